use chrono::{DateTime, Utc};
use querycast_core::event::{EventBody, Position, ResultEvent};
use querycast_core::event_log::{AppendOutcome, EventLog, EventLogError, LogFuture};
use querycast_core::query::QueryId;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

type EventRow = (i64, serde_json::Value, DateTime<Utc>);

/// Durable [`EventLog`] backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Connect with a pool of up to 10 connections.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, EventLogError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| EventLogError::Storage(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Use an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `query_logs` and `query_events` tables if missing.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] if migration fails.
    pub async fn migrate(&self) -> Result<(), EventLogError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EventLogError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Write `body` at `position`, or at the head when `position` is `None`.
    async fn write(
        &self,
        query_id: &QueryId,
        position: Option<Position>,
        body: EventBody,
    ) -> Result<AppendOutcome, EventLogError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let (head, sealed) = lock_head(&mut tx, query_id).await?;
        let target = match position {
            None => head,
            Some(position) => {
                let requested = to_db(position)?;
                if requested < head {
                    return Ok(AppendOutcome::AlreadyPresent);
                }
                if requested > head {
                    return Err(EventLogError::Gap {
                        query_id: query_id.clone(),
                        expected: from_db(head)?,
                        found: position,
                    });
                }
                requested
            }
        };
        if sealed {
            return Err(EventLogError::Sealed(query_id.clone()));
        }

        let event = ResultEvent::new(from_db(target)?, body);
        let encoded = serde_json::to_value(&event.body)
            .map_err(|e| EventLogError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO query_events (query_id, position, kind, body, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(query_id.as_str())
        .bind(target)
        .bind(event.kind().as_str())
        .bind(encoded)
        .bind(event.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r"
            UPDATE query_logs
            SET next_position = next_position + 1, sealed = $2, last_write = now()
            WHERE query_id = $1
            ",
        )
        .bind(query_id.as_str())
        .bind(event.is_terminal())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        metrics::counter!("querycast.postgres.appends", "kind" => event.kind().as_str())
            .increment(1);
        tracing::trace!(
            query_id = %query_id.short(),
            position = %event.position,
            kind = %event.kind(),
            "Event stored"
        );
        Ok(AppendOutcome::Recorded(event))
    }
}

/// Create the head row if needed and lock it for the rest of the transaction.
async fn lock_head(
    tx: &mut Transaction<'_, Postgres>,
    query_id: &QueryId,
) -> Result<(i64, bool), EventLogError> {
    sqlx::query("INSERT INTO query_logs (query_id) VALUES ($1) ON CONFLICT (query_id) DO NOTHING")
        .bind(query_id.as_str())
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

    sqlx::query_as("SELECT next_position, sealed FROM query_logs WHERE query_id = $1 FOR UPDATE")
        .bind(query_id.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)
}

fn storage(e: sqlx::Error) -> EventLogError {
    EventLogError::Storage(e.to_string())
}

fn to_db(position: Position) -> Result<i64, EventLogError> {
    i64::try_from(position.value())
        .map_err(|_| EventLogError::Storage(format!("Position {position} out of range")))
}

fn from_db(value: i64) -> Result<Position, EventLogError> {
    u64::try_from(value)
        .map(Position::new)
        .map_err(|_| EventLogError::Storage(format!("Negative position {value} in storage")))
}

fn decode((position, body, recorded_at): EventRow) -> Result<ResultEvent, EventLogError> {
    Ok(ResultEvent {
        position: from_db(position)?,
        recorded_at,
        body: serde_json::from_value(body)
            .map_err(|e| EventLogError::Serialization(e.to_string()))?,
    })
}

impl EventLog for PostgresEventLog {
    fn append<'a>(&'a self, query_id: &'a QueryId, body: EventBody) -> LogFuture<'a, ResultEvent> {
        Box::pin(async move {
            match self.write(query_id, None, body).await? {
                AppendOutcome::Recorded(event) => Ok(event),
                AppendOutcome::AlreadyPresent => Err(EventLogError::Storage(
                    "Head append reported an existing position".to_string(),
                )),
            }
        })
    }

    fn append_at<'a>(
        &'a self,
        query_id: &'a QueryId,
        position: Position,
        body: EventBody,
    ) -> LogFuture<'a, AppendOutcome> {
        Box::pin(async move { self.write(query_id, Some(position), body).await })
    }

    fn len<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, u64> {
        Box::pin(async move {
            let head: Option<(i64,)> =
                sqlx::query_as("SELECT next_position FROM query_logs WHERE query_id = $1")
                    .bind(query_id.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(storage)?;
            match head {
                Some((next,)) => from_db(next).map(Position::value),
                None => Ok(0),
            }
        })
    }

    fn read<'a>(
        &'a self,
        query_id: &'a QueryId,
        position: Position,
    ) -> LogFuture<'a, Option<ResultEvent>> {
        Box::pin(async move {
            let row: Option<EventRow> = sqlx::query_as(
                r"
                SELECT position, body, recorded_at
                FROM query_events
                WHERE query_id = $1 AND position = $2
                ",
            )
            .bind(query_id.as_str())
            .bind(to_db(position)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
            row.map(decode).transpose()
        })
    }

    fn read_from<'a>(
        &'a self,
        query_id: &'a QueryId,
        from: Position,
    ) -> LogFuture<'a, Vec<ResultEvent>> {
        Box::pin(async move {
            let rows: Vec<EventRow> = sqlx::query_as(
                r"
                SELECT position, body, recorded_at
                FROM query_events
                WHERE query_id = $1 AND position >= $2
                ORDER BY position ASC
                ",
            )
            .bind(query_id.as_str())
            .bind(to_db(from)?)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
            rows.into_iter().map(decode).collect()
        })
    }

    fn terminal<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, Option<ResultEvent>> {
        Box::pin(async move {
            let row: Option<EventRow> = sqlx::query_as(
                r"
                SELECT e.position, e.body, e.recorded_at
                FROM query_logs l
                JOIN query_events e
                  ON e.query_id = l.query_id AND e.position = l.next_position - 1
                WHERE l.query_id = $1 AND l.sealed
                ",
            )
            .bind(query_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
            row.map(decode).transpose()
        })
    }

    fn remove<'a>(&'a self, query_id: &'a QueryId) -> LogFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM query_logs WHERE query_id = $1")
                .bind(query_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(storage)?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn purge_expired(&self, retention: Duration) -> LogFuture<'_, usize> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM query_logs WHERE last_write < now() - make_interval(secs => $1)",
            )
            .bind(retention.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(storage)?;

            let purged = usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
            if purged > 0 {
                tracing::info!(purged, "Purged expired event logs");
            }
            Ok(purged)
        })
    }
}
