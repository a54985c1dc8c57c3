use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, info};

use crate::{
    clients::broker::{Delivery, DeliveryAcker, DeliveryStream, MessageBroker},
    config::Config,
    error::BrokerError,
    models::message::DeadLetter,
};

pub const ATTEMPT_HEADER: &str = "x-delivery-attempt";

#[derive(Debug, Clone)]
struct QueueNames {
    notifications: String,
    retry: String,
    failed: String,
}

pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    queues: QueueNames,
    prefetch_count: u16,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, BrokerError> {
        info!("Connecting to RabbitMQ...");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("channel creation failed: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("enabling publisher confirms failed: {}", e)))?;

        info!("RabbitMQ connection established");

        let queues = QueueNames {
            notifications: config.notification_queue_name.clone(),
            retry: config.retry_queue_name.clone(),
            failed: config.failed_queue_name.clone(),
        };

        declare_queue(&channel, &queues.notifications, FieldTable::default()).await?;

        // Expired retries are dead-lettered straight back into the main queue.
        let mut retry_arguments = FieldTable::default();
        retry_arguments.insert("x-message-ttl".into(), AMQPValue::LongUInt(config.retry_delay_ms));
        retry_arguments.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));
        retry_arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(queues.notifications.as_str().into()),
        );
        declare_queue(&channel, &queues.retry, retry_arguments).await?;

        declare_queue(&channel, &queues.failed, FieldTable::default()).await?;

        info!(
            notifications = %queues.notifications,
            retry = %queues.retry,
            failed = %queues.failed,
            "Queues declared"
        );

        Ok(Self {
            connection,
            channel,
            queues,
            prefetch_count: config.prefetch_count,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}

#[async_trait]
impl MessageBroker for RabbitMqClient {
    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        publish_persistent(&self.channel, routing_key, body, FieldTable::default()).await
    }

    async fn consume(
        &self,
        routing_key: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let consume_error = |e: lapin::Error| BrokerError::Consume {
            routing_key: routing_key.to_string(),
            reason: e.to_string(),
        };

        let channel = self.connection.create_channel().await.map_err(consume_error)?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(consume_error)?;

        // Retries and dead letters are published on this channel too.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(consume_error)?;

        let consumer = channel
            .basic_consume(
                routing_key,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(consume_error)?;

        info!(queue = routing_key, consumer_tag, "Consumer created for queue");

        let queues = self.queues.clone();
        let queue_name = routing_key.to_string();

        let deliveries = consumer.map(move |item| match item {
            Ok(mut delivery) => {
                let attempt = delivery_attempt(&delivery.properties);
                let acker = RabbitMqAcker {
                    channel: channel.clone(),
                    delivery_tag: delivery.delivery_tag,
                    queues: queues.clone(),
                };

                Ok(Delivery::new(std::mem::take(&mut delivery.data), attempt, Box::new(acker)))
            }
            Err(e) => Err(BrokerError::Consume {
                routing_key: queue_name.clone(),
                reason: e.to_string(),
            }),
        });

        Ok(deliveries.boxed())
    }
}

struct RabbitMqAcker {
    channel: Channel,
    delivery_tag: u64,
    queues: QueueNames,
}

impl RabbitMqAcker {
    /// Returns the original to the queue when the hand-off publish failed,
    /// so the message is never lost between the two steps.
    async fn requeue_after(&self, error: BrokerError) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                self.delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: true,
                },
            )
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))?;

        Err(error)
    }
}

#[async_trait]
impl DeliveryAcker for RabbitMqAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(self.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(self.delivery_tag, BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))
    }

    async fn retry(&self, body: &[u8], next_attempt: u32) -> Result<(), BrokerError> {
        let mut headers = FieldTable::default();
        headers.insert(ATTEMPT_HEADER.into(), AMQPValue::LongUInt(next_attempt));

        if let Err(e) = publish_persistent(&self.channel, &self.queues.retry, body, headers).await {
            return self.requeue_after(e).await;
        }

        debug!(next_attempt, queue = %self.queues.retry, "Message scheduled for redelivery");
        self.ack().await
    }

    async fn dead_letter(&self, record: &DeadLetter) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(record)?;

        if let Err(e) =
            publish_persistent(&self.channel, &self.queues.failed, &payload, FieldTable::default())
                .await
        {
            return self.requeue_after(e).await;
        }

        self.ack().await
    }
}

async fn declare_queue(
    channel: &Channel,
    name: &str,
    arguments: FieldTable,
) -> Result<(), BrokerError> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            arguments,
        )
        .await
        .map_err(|e| BrokerError::Connection(format!("failed to declare queue {}: {}", name, e)))?;

    Ok(())
}

async fn publish_persistent(
    channel: &Channel,
    routing_key: &str,
    body: &[u8],
    headers: FieldTable,
) -> Result<(), BrokerError> {
    let publish_error = |e: lapin::Error| BrokerError::Publish {
        routing_key: routing_key.to_string(),
        reason: e.to_string(),
    };

    let confirmation = channel
        .basic_publish(
            "",
            routing_key,
            BasicPublishOptions::default(),
            body,
            BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2)
                .with_headers(headers),
        )
        .await
        .map_err(publish_error)?
        .await
        .map_err(publish_error)?;

    if confirmation.is_nack() {
        return Err(BrokerError::Publish {
            routing_key: routing_key.to_string(),
            reason: "broker refused the message".to_string(),
        });
    }

    Ok(())
}

fn delivery_attempt(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == ATTEMPT_HEADER)
                .map(|(_, value)| value.clone())
        })
        .and_then(|value| match value {
            AMQPValue::ShortShortUInt(v) => Some(u32::from(v)),
            AMQPValue::ShortUInt(v) => Some(u32::from(v)),
            AMQPValue::LongUInt(v) => Some(v),
            AMQPValue::LongInt(v) => u32::try_from(v).ok(),
            AMQPValue::LongLongInt(v) => u32::try_from(v).ok(),
            _ => None,
        })
        .unwrap_or(1)
}
