//! Component health for the readiness endpoint.

use crate::engine::SearchEngine;
use querycast_core::query::{QUERY_ID_LEN, QueryId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component works but needs attention
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health of one component.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Component name
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Details when not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Component figures (active queries, topics)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: BTreeMap::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Aggregated health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status of all checks
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// When the report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// Probe the engine's registry, bus and log.
pub async fn engine_report(engine: &SearchEngine) -> HealthReport {
    let mut checks = Vec::with_capacity(3);

    let registry = if engine.is_shutting_down() {
        HealthCheck::unhealthy("registry", "Shutting down")
    } else {
        HealthCheck::healthy("registry")
    };
    checks.push(
        registry
            .with_metadata("active_queries", engine.active_count().await)
            .with_metadata("registered", engine.registry().len().await),
    );

    checks.push(match engine.bus().topic_count().await {
        Ok(topics) => HealthCheck::healthy("notification_bus").with_metadata("topics", topics),
        Err(e) => HealthCheck::unhealthy("notification_bus", e.to_string()),
    });

    let probe: Option<QueryId> = "0".repeat(QUERY_ID_LEN).parse().ok();
    checks.push(match probe {
        Some(probe) => match engine.log().len(&probe).await {
            Ok(_) => HealthCheck::healthy("event_log"),
            Err(e) => HealthCheck::unhealthy("event_log", e.to_string()),
        },
        None => HealthCheck::unhealthy("event_log", "Probe id rejected"),
    });

    HealthReport::new(checks)
}
