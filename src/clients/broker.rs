use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::{error::BrokerError, models::message::DeadLetter};

pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Publish/consume capability of the message broker.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Opens an endless stream of deliveries for `routing_key`. Each call
    /// acquires its own consumer, so every worker holds an independent one.
    async fn consume(
        &self,
        routing_key: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError>;
}

/// Broker-side settlement of a single delivery.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Removes the message without redelivery.
    async fn reject(&self) -> Result<(), BrokerError>;

    /// Schedules `body` for redelivery as attempt number `next_attempt`.
    async fn retry(&self, body: &[u8], next_attempt: u32) -> Result<(), BrokerError>;

    async fn dead_letter(&self, record: &DeadLetter) -> Result<(), BrokerError>;
}

/// A received message. Settling consumes it, so it can be settled only once;
/// dropping it unsettled leaves the message with the broker for redelivery.
pub struct Delivery {
    pub body: Vec<u8>,
    pub attempt: u32,
    acker: Box<dyn DeliveryAcker>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, attempt: u32, acker: Box<dyn DeliveryAcker>) -> Self {
        Self {
            body,
            attempt: attempt.max(1),
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn reject(self) -> Result<(), BrokerError> {
        self.acker.reject().await
    }

    pub async fn retry(self) -> Result<(), BrokerError> {
        self.acker.retry(&self.body, self.attempt + 1).await
    }

    pub async fn dead_letter(self, failure_reason: impl Into<String>) -> Result<(), BrokerError> {
        let record = DeadLetter::new(&self.body, failure_reason, self.attempt);
        self.acker.dead_letter(&record).await
    }
}
