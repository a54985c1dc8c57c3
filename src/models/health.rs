use chrono::{DateTime, Utc};
use serde::Serialize;

/// Ordered from best to worst so the overall status is the maximum.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    pub fn up(latency_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn down(status: HealthStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            latency_ms: None,
            error: Some(error.into()),
        }
    }
}

/// Body of `GET /health`.
///
/// The broker is required for dispatching; the task API only feeds the
/// graduation producer, so losing it degrades rather than fails the service.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub message_broker: DependencyHealth,
    pub task_api: DependencyHealth,
}

impl HealthReport {
    pub fn new(message_broker: DependencyHealth, task_api: DependencyHealth) -> Self {
        Self {
            status: message_broker.status.max(task_api.status),
            checked_at: Utc::now(),
            message_broker,
            task_api,
        }
    }
}
