//! Querycast server wiring: configuration and the mock flight sources.

pub mod config;
pub mod flights;

pub use config::Config;
pub use flights::{MockFlightSource, default_sources};
