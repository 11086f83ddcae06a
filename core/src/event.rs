//! Result events: the ordered, immutable entries of a query's event log.
//!
//! Events are facts about a query that have already happened. They are appended
//! once and never modified. Every event carries its 0-based position in the log,
//! which is the cursor clients use to resume.
//!
//! # Terminal events
//!
//! `Completed` and `Cancelled` are terminal. At most one terminal event exists per
//! query and it is always the last entry ever appended; the event log enforces
//! this by sealing itself once a terminal event is stored.
//!
//! # Example
//!
//! ```
//! use querycast_core::event::{EventBody, EventKind, Position};
//!
//! let body = EventBody::result(serde_json::json!({ "airline": "Garuda" }));
//! assert_eq!(body.kind(), EventKind::Result);
//! assert!(!body.is_terminal());
//!
//! assert!(EventBody::Completed { total_flights: 3 }.is_terminal());
//! assert_eq!(Position::ZERO.next(), Position::new(1));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 0-based position of an event in a query's log.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(u64);

impl Position {
    /// First position of every log.
    pub const ZERO: Self = Self(0);

    /// Create a position from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Position immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Number of events up to and including this position.
    #[must_use]
    pub const fn events_through(self) -> u64 {
        self.0 + 1
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Discriminant of an [`EventBody`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// One search result.
    Result,
    /// Informational progress marker.
    Progress,
    /// All expected results were emitted.
    Completed,
    /// The query was cancelled.
    Cancelled,
}

impl EventKind {
    /// Stable name used for storage columns and log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Result => "result",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether events of this kind end a query's log.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of a result event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    /// Opaque payload produced by a result source.
    Result {
        /// Arbitrary structured data, shape owned by the source.
        payload: serde_json::Value,
    },
    /// Progress marker.
    Progress {
        /// Human-readable status line.
        message: String,
    },
    /// Terminal: the expected number of results was reached.
    Completed {
        /// Number of results emitted.
        total_flights: u64,
    },
    /// Terminal: the query was cancelled.
    Cancelled {
        /// Number of results emitted before cancellation.
        total_flights: u64,
    },
}

impl EventBody {
    /// Build a `Result` body.
    #[must_use]
    pub const fn result(payload: serde_json::Value) -> Self {
        Self::Result { payload }
    }

    /// Discriminant.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Result { .. } => EventKind::Result,
            Self::Progress { .. } => EventKind::Progress,
            Self::Completed { .. } => EventKind::Completed,
            Self::Cancelled { .. } => EventKind::Cancelled,
        }
    }

    /// Whether this body ends the log.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

/// An entry of a query's event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Position in the log (append order).
    pub position: Position,
    /// When the log recorded the event.
    pub recorded_at: DateTime<Utc>,
    /// Event content.
    pub body: EventBody,
}

impl ResultEvent {
    /// Create an event recorded now.
    #[must_use]
    pub fn new(position: Position, body: EventBody) -> Self {
        Self {
            position,
            recorded_at: Utc::now(),
            body,
        }
    }

    /// Discriminant of the body.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.body.kind()
    }

    /// Whether this is a `Completed` or `Cancelled` event.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.body.is_terminal()
    }

    /// The message that announces this event on the notification bus.
    #[must_use]
    pub fn to_message(&self) -> BusMessage {
        BusMessage {
            position: Some(self.position),
            body: self.body.clone(),
        }
    }
}

/// Message carried by the notification bus.
///
/// `position` is the log position the event was recorded at. It is `None` when
/// the producer could not write the event to the log; the log mirror listener
/// records such messages on the producer's behalf.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Log position, when the event is already recorded.
    pub position: Option<Position>,
    /// Event content.
    pub body: EventBody,
}

impl BusMessage {
    /// A message for an event the log has not recorded.
    #[must_use]
    pub const fn unrecorded(body: EventBody) -> Self {
        Self {
            position: None,
            body,
        }
    }

    /// Whether this message ends the query.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.body.is_terminal()
    }
}

impl From<&ResultEvent> for BusMessage {
    fn from(event: &ResultEvent) -> Self {
        event.to_message()
    }
}
