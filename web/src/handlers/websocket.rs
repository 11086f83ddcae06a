//! WebSocket stream adapter.
//!
//! ```text
//! Client          Handler               SearchEngine
//!   │                │                       │
//!   ├─ Upgrade ─────>│                       │
//!   │                ├─ open_live() ────────>│
//!   │<─ progress ────┤                       │
//!   │<─ flight ──────┤<── topic messages ────┤
//!   │<─ completed ───┤                       │
//!   │<─ Close ───────┤                       │
//! ```
//!
//! Every frame is a JSON [`Notification`](querycast_core::notification::Notification). An unknown or missing `query_id`
//! is answered with one `{"type":"error"}` frame and a close.

use crate::extractors::RawQueryId;
use crate::state::AppState;
use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use querycast_runtime::DeliveryError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Frame sent when no session can be opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsError {
    /// Error description.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

/// Upgrade and stream the query's notifications.
///
/// ```text
/// GET /ws/result/stream?query_id=...
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn stream_results(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(raw): Query<RawQueryId>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, raw))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, raw: RawQueryId) {
    let opened = match raw.parse() {
        Ok(query_id) => state
            .engine()
            .open_live(&query_id, None)
            .await
            .map_err(|e| match e {
                DeliveryError::NotFound(_) => "query not found".to_string(),
                other => other.to_string(),
            }),
        Err(e) => Err(e.to_string()),
    };

    let session = match opened {
        Ok(session) => session,
        Err(message) => {
            debug!(%message, "Rejecting WebSocket stream");
            if let Some(frame) = encode(&WsError::Error { message }) {
                let _ = socket.send(frame).await;
            }
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let query_id = session.query_id().clone();
    info!(query_id = %query_id.short(), "WebSocket stream opened");
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        let mut session = session;
        while let Some(notification) = session.next().await {
            let Some(frame) = encode(&notification) else {
                continue;
            };
            if sender.send(frame).await.is_err() {
                // client went away
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        debug!("WebSocket send task terminated");
    });

    // Inbound frames are ignored; this only notices the client closing.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
        debug!("WebSocket receive task terminated");
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }
    info!(query_id = %query_id.short(), "WebSocket stream closed");
}

fn encode<T: Serialize>(value: &T) -> Option<Message> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WebSocket frame");
            None
        }
    }
}
