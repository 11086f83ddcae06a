//! `PostgreSQL` event log for Querycast.
//!
//! Implements [`EventLog`](querycast_core::event_log::EventLog) on two tables:
//!
//! - `query_logs`: one head row per query (next position, seal flag, last write)
//! - `query_events`: one row per event, keyed by `(query_id, position)`
//!
//! Every write locks the query's head row inside a transaction, so concurrent
//! producers and the log mirror of one query get contiguous positions while
//! other queries proceed in parallel.
//!
//! # Example
//!
//! ```no_run
//! use querycast_postgres::PostgresEventLog;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = PostgresEventLog::new("postgres://localhost/querycast").await?;
//! log.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod event_log;

pub use event_log::PostgresEventLog;
