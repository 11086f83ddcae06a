//! HTTP request handlers.
//!
//! - [`search`]: start, cancel and inspect queries
//! - [`websocket`], [`sse`], [`longpoll`]: the three delivery adapters
//! - [`health`]: liveness and readiness

pub mod health;
pub mod longpoll;
pub mod search;
pub mod sse;
pub mod websocket;

pub use health::{health_check, readiness_check};
