//! Wire notifications sent to clients by every delivery adapter.
//!
//! Serialized as JSON objects tagged by `type`. The server-push adapter uses the
//! same `type` value as its event name.
//!
//! ```
//! use querycast_core::notification::Notification;
//! use querycast_core::progress::Progress;
//!
//! let done = Notification::completed(24, Some(25));
//! let json = serde_json::to_value(&done).unwrap();
//! assert_eq!(json["type"], "completed");
//! assert_eq!(json["progress"], 100);
//! assert_eq!(json["last_seen_index"], 25);
//! assert!(done.is_terminal());
//!
//! assert_eq!(Notification::starting().progress(), Progress::ZERO);
//! ```

use crate::progress::Progress;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys of a `flight` notification that a payload may not override.
const RESERVED_FLIGHT_KEYS: &[&str] = &[
    "type",
    "progress",
    "status",
    "received_flights",
    "total_expected",
    "last_seen_index",
];

/// Client-visible search status.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    /// Results are still arriving.
    Searching,
    /// Every expected result was delivered.
    Completed,
    /// The query was cancelled.
    Cancelled,
}

/// One message to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Informational progress update.
    Progress {
        /// Current percentage.
        progress: Progress,
        /// Always `searching`.
        status: SearchStatus,
        /// Human-readable status line.
        message: String,
    },

    /// One search result, payload fields inlined.
    Flight {
        /// Result payload as produced by the source.
        #[serde(flatten)]
        payload: Map<String, Value>,
        /// Current percentage.
        progress: Progress,
        /// Events seen by this client so far.
        received_flights: u64,
        /// Expected result count of the query.
        total_expected: u64,
        /// Always `searching`.
        status: SearchStatus,
        /// Cursor to send on the next poll (cursor adapter only).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen_index: Option<u64>,
    },

    /// Terminal: every expected result was emitted.
    Completed {
        /// Always 100.
        progress: Progress,
        /// Always `completed`.
        status: SearchStatus,
        /// Human-readable status line.
        message: String,
        /// Number of results emitted.
        total_flights: u64,
        /// Cursor to send on the next poll (cursor adapter only).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen_index: Option<u64>,
    },

    /// Terminal: the query was cancelled.
    Cancelled {
        /// Always 100.
        progress: Progress,
        /// Always `cancelled`.
        status: SearchStatus,
        /// Human-readable status line.
        message: String,
        /// Cursor to send on the next poll (cursor adapter only).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen_index: Option<u64>,
    },

    /// Nothing new arrived within the wait window; poll again.
    Timeout {
        /// Current percentage.
        progress: Progress,
        /// Always `searching`.
        status: SearchStatus,
        /// Human-readable status line.
        message: String,
        /// Always `true`.
        should_continue: bool,
        /// Length of the wait window that elapsed.
        timeout_seconds: u64,
        /// Cursor to send on the next poll, unchanged.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen_index: Option<u64>,
        /// Events seen by this client so far.
        received_flights: u64,
        /// Expected result count of the query.
        total_expected: u64,
    },
}

impl Notification {
    /// First message of every live session.
    #[must_use]
    pub fn starting() -> Self {
        Self::Progress {
            progress: Progress::ZERO,
            status: SearchStatus::Searching,
            message: "Starting flight search...".to_string(),
        }
    }

    /// A result notification.
    ///
    /// Object payloads are inlined. Any other JSON value, or an object using one
    /// of the notification's own keys, is carried under a `payload` key.
    #[must_use]
    pub fn flight(
        payload: Value,
        progress: Progress,
        received_flights: u64,
        total_expected: u64,
        last_seen_index: Option<u64>,
    ) -> Self {
        let payload = match payload {
            Value::Object(map) if !overrides_flight_keys(&map) => map,
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        };
        Self::Flight {
            payload,
            progress,
            received_flights,
            total_expected,
            status: SearchStatus::Searching,
            last_seen_index,
        }
    }

    /// The completion notification.
    #[must_use]
    pub fn completed(total_flights: u64, last_seen_index: Option<u64>) -> Self {
        Self::Completed {
            progress: Progress::COMPLETE,
            status: SearchStatus::Completed,
            message: "All flights found".to_string(),
            total_flights,
            last_seen_index,
        }
    }

    /// The cancellation notification.
    #[must_use]
    pub fn cancelled(last_seen_index: Option<u64>) -> Self {
        Self::Cancelled {
            progress: Progress::COMPLETE,
            status: SearchStatus::Cancelled,
            message: "Search was cancelled".to_string(),
            last_seen_index,
        }
    }

    /// The "poll again" notification.
    #[must_use]
    pub fn timeout(
        progress: Progress,
        timeout_seconds: u64,
        last_seen_index: Option<u64>,
        received_flights: u64,
        total_expected: u64,
    ) -> Self {
        Self::Timeout {
            progress,
            status: SearchStatus::Searching,
            message: format!("No new results in {timeout_seconds}s, keep polling"),
            should_continue: true,
            timeout_seconds,
            last_seen_index,
            received_flights,
            total_expected,
        }
    }

    /// The `type` tag, also used as the server-push event name.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Flight { .. } => "flight",
            Self::Completed { .. } => "completed",
            Self::Cancelled { .. } => "cancelled",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Reported percentage.
    #[must_use]
    pub const fn progress(&self) -> Progress {
        match self {
            Self::Progress { progress, .. }
            | Self::Flight { progress, .. }
            | Self::Completed { progress, .. }
            | Self::Cancelled { progress, .. }
            | Self::Timeout { progress, .. } => *progress,
        }
    }

    /// Cursor carried by the notification, if any.
    #[must_use]
    pub const fn last_seen_index(&self) -> Option<u64> {
        match self {
            Self::Flight { last_seen_index, .. }
            | Self::Completed { last_seen_index, .. }
            | Self::Cancelled { last_seen_index, .. }
            | Self::Timeout { last_seen_index, .. } => *last_seen_index,
            Self::Progress { .. } => None,
        }
    }

    /// Whether the session ends after this notification.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled { .. })
    }
}

fn overrides_flight_keys(payload: &Map<String, Value>) -> bool {
    RESERVED_FLIGHT_KEYS.iter().any(|key| payload.contains_key(*key))
}
