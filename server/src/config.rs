//! Configuration management for the Querycast server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unparseable values fall back to the default.

use querycast_runtime::delivery::CursorConfig;
use querycast_runtime::engine::EngineConfig;
use querycast_runtime::janitor::JanitorConfig;
use querycast_runtime::producer::ProducerConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Engine timing
    pub engine: EngineSettings,
    /// `PostgreSQL` URL; the in-memory log is used when absent
    pub database_url: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Base URL put in delivery links
    pub public_base_url: String,
    /// Prometheus endpoint address, disabled when absent
    pub metrics_addr: Option<SocketAddr>,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Engine timing, in the units of the environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// How long ended queries stay readable, seconds
    pub retention_secs: u64,
    /// Delay before a cancelled query's log and topic are removed, seconds
    pub cancel_grace_secs: u64,
    /// Time between retention sweeps, seconds
    pub sweep_interval_secs: u64,
    /// Long-poll re-read interval, milliseconds
    pub longpoll_interval_ms: u64,
    /// Longest long-poll wait, seconds
    pub longpoll_max_wait_secs: u64,
    /// Server-push idle window, seconds
    pub sse_idle_secs: u64,
    /// Shortest delay before each result, milliseconds
    pub min_delay_ms: u64,
    /// Longest delay before each result, milliseconds
    pub max_delay_ms: u64,
    /// Per-topic buffer of the in-memory bus
    pub bus_capacity: usize,
}

impl Config {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str, default: u64| parse_var(&lookup, key).unwrap_or(default);

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_var(&lookup, "PORT").unwrap_or(3001);
        Self {
            server: ServerConfig {
                public_base_url: lookup("PUBLIC_BASE_URL")
                    .unwrap_or_else(|| format!("http://localhost:{port}")),
                host,
                port,
                metrics_addr: lookup("METRICS_ADDR").and_then(|s| parse_addr(&s)),
                shutdown_timeout: number("SHUTDOWN_TIMEOUT_SECS", 30),
            },
            engine: EngineSettings {
                retention_secs: number("QUERYCAST_RETENTION_SECS", 30 * 60),
                cancel_grace_secs: number("QUERYCAST_CANCEL_GRACE_SECS", 5),
                sweep_interval_secs: number("QUERYCAST_SWEEP_INTERVAL_SECS", 60),
                longpoll_interval_ms: number("QUERYCAST_LONGPOLL_INTERVAL_MS", 500),
                longpoll_max_wait_secs: number("QUERYCAST_LONGPOLL_MAX_WAIT_SECS", 300),
                sse_idle_secs: number("QUERYCAST_SSE_IDLE_SECS", 30),
                min_delay_ms: number("QUERYCAST_MIN_DELAY_MS", 10),
                max_delay_ms: number("QUERYCAST_MAX_DELAY_MS", 710),
                bus_capacity: parse_var(&lookup, "QUERYCAST_BUS_CAPACITY").unwrap_or(1000),
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
        }
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Graceful shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }

    /// Server-push idle window.
    #[must_use]
    pub const fn sse_idle(&self) -> Duration {
        Duration::from_secs(self.engine.sse_idle_secs)
    }

    /// Engine tuning derived from the settings.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let e = &self.engine;
        EngineConfig {
            producer: ProducerConfig::new(
                Duration::from_millis(e.min_delay_ms),
                Duration::from_millis(e.max_delay_ms),
            ),
            cancel_grace: Duration::from_secs(e.cancel_grace_secs),
            janitor: JanitorConfig {
                sweep_interval: Duration::from_secs(e.sweep_interval_secs.max(1)),
                retention: Duration::from_secs(e.retention_secs),
            },
            cursor: CursorConfig {
                interval: Duration::from_millis(e.longpoll_interval_ms.max(1)),
                max_wait: Duration::from_secs(e.longpoll_max_wait_secs),
            },
            ..EngineConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn parse_addr(raw: &str) -> Option<SocketAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match SocketAddr::from_str(raw) {
        Ok(addr) => Some(addr),
        Err(e) => {
            tracing::warn!(value = raw, error = %e, "Ignoring invalid METRICS_ADDR");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]);
        assert_eq!(config.bind_addr(), "0.0.0.0:3001");
        assert_eq!(config.server.public_base_url, "http://localhost:3001");
        assert!(config.server.metrics_addr.is_none());
        assert!(config.database_url.is_none());

        let engine = config.engine_config();
        assert_eq!(engine.cursor, CursorConfig::default());
        assert_eq!(engine.janitor, JanitorConfig::default());
        assert_eq!(engine.cancel_grace, Duration::from_secs(5));
        assert_eq!(config.sse_idle(), Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("PORT", "8080"),
            ("METRICS_ADDR", "127.0.0.1:9090"),
            ("QUERYCAST_LONGPOLL_MAX_WAIT_SECS", "20"),
            ("QUERYCAST_CANCEL_GRACE_SECS", "1"),
            ("DATABASE_URL", "postgres://localhost/querycast"),
        ]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.public_base_url, "http://localhost:8080");
        assert_eq!(config.server.metrics_addr, Some("127.0.0.1:9090".parse().unwrap()));
        assert_eq!(config.engine_config().cursor.max_wait, Duration::from_secs(20));
        assert_eq!(config.engine_config().cancel_grace, Duration::from_secs(1));
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/querycast")
        );
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = config(&[
            ("PORT", "http"),
            ("METRICS_ADDR", "nowhere"),
            ("QUERYCAST_SSE_IDLE_SECS", "-3"),
            ("DATABASE_URL", "  "),
        ]);
        assert_eq!(config.server.port, 3001);
        assert!(config.server.metrics_addr.is_none());
        assert_eq!(config.sse_idle(), Duration::from_secs(30));
        assert!(config.database_url.is_none());
    }
}
