//! # Querycast Runtime
//!
//! Execution side of asynchronous query result distribution.
//!
//! ## Core Components
//!
//! - **Query registry**: owns every running query, performs the terminal
//!   transitions and supervises per-query tasks
//! - **Producer**: one worker per result source, appending results to the event
//!   log and announcing them on the notification bus
//! - **Log mirror**: copies bus messages into the log so pull-based readers never
//!   miss an event
//! - **Delivery**: live sessions for push adapters, cursor reader for long-poll
//! - **Janitor**: retention sweep of ended queries
//! - **`SearchEngine`**: the facade wiring all of the above
//!
//! ## Example
//!
//! ```no_run
//! use querycast_runtime::{EngineConfig, InMemoryEventLog, InMemoryNotificationBus, SearchEngine};
//! use std::sync::Arc;
//!
//! let engine = SearchEngine::new(
//!     Arc::new(InMemoryEventLog::new()),
//!     Arc::new(InMemoryNotificationBus::new()),
//!     Vec::new(),
//!     EngineConfig::default(),
//! );
//! ```

pub mod delivery;
pub mod engine;
pub mod health;
pub mod janitor;
pub mod memory_bus;
pub mod memory_log;
pub mod metrics;
pub mod mirror;
pub mod producer;
pub mod registry;

pub use delivery::{CursorConfig, CursorReader, DeliveryError, LiveSession};
pub use engine::{EngineConfig, EngineError, QueryStatus, SearchEngine};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use janitor::JanitorConfig;
pub use memory_bus::InMemoryNotificationBus;
pub use memory_log::InMemoryEventLog;
pub use producer::{ProducerConfig, ResultSource, SearchPlan, SourceError, SourceFuture};
pub use registry::{QueryEntry, QueryRegistry, QuerySnapshot};
