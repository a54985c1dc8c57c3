use std::sync::Arc;

use tracing::debug;

use crate::{
    clients::broker::MessageBroker,
    error::BrokerError,
    models::{
        email::EmailNotification,
        notification::{NotificationEnvelope, NotificationKind},
    },
};

/// Serializes envelopes and hands them to the broker.
#[derive(Clone)]
pub struct NotificationPublisher {
    broker: Arc<dyn MessageBroker>,
    routing_key: String,
}

impl NotificationPublisher {
    pub fn new(broker: Arc<dyn MessageBroker>, routing_key: impl Into<String>) -> Self {
        Self {
            broker,
            routing_key: routing_key.into(),
        }
    }

    pub async fn publish(&self, envelope: &NotificationEnvelope) -> Result<(), BrokerError> {
        let body = envelope.to_vec()?;

        self.broker.publish(&self.routing_key, &body).await?;

        debug!(
            envelope_id = %envelope.id,
            kind = %envelope.kind,
            routing_key = %self.routing_key,
            "Notification published"
        );

        Ok(())
    }

    pub async fn publish_email(
        &self,
        email: &EmailNotification,
    ) -> Result<NotificationEnvelope, BrokerError> {
        let envelope = NotificationEnvelope::new(NotificationKind::Email, email)?;
        self.publish(&envelope).await?;
        Ok(envelope)
    }
}
