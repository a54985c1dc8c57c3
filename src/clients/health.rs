use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    clients::{rbmq::RabbitMqClient, task_api::TaskApiClient},
    models::health::{DependencyHealth, HealthReport, HealthStatus},
};

pub struct HealthChecker {
    broker: Arc<RabbitMqClient>,
    task_api: Arc<TaskApiClient>,
}

impl HealthChecker {
    pub fn new(broker: Arc<RabbitMqClient>, task_api: Arc<TaskApiClient>) -> Self {
        Self { broker, task_api }
    }

    pub async fn check_all(&self) -> HealthReport {
        HealthReport::new(self.check_broker(), self.check_task_api().await)
    }

    fn check_broker(&self) -> DependencyHealth {
        if self.broker.is_connected() {
            debug!("RabbitMQ health check passed");
            DependencyHealth::up(0)
        } else {
            warn!("RabbitMQ connection lost");
            DependencyHealth::down(HealthStatus::Unhealthy, "Connection lost")
        }
    }

    async fn check_task_api(&self) -> DependencyHealth {
        match self.task_api.ping().await {
            Ok(elapsed) => {
                debug!(latency_ms = elapsed, "Task API health check passed");
                DependencyHealth::up(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Task API unreachable");
                DependencyHealth::down(HealthStatus::Degraded, e.to_string())
            }
        }
    }
}
