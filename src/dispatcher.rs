//! Consumer side: pulls envelopes from the broker and runs each one through
//! the handler registered for its kind.
//!
//! Per message the pipeline is `resolve -> parse -> validate -> execute`.
//! Only a transient delivery failure is handed back to the broker for
//! redelivery; every other failure is permanent and the message is dropped.
//! Messages are settled only after the pipeline has finished, so a crash
//! mid-message leaves it on the queue.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::{sync::watch, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{
    clients::broker::{Delivery, DeliveryStream, MessageBroker},
    config::Config,
    error::{DispatchError, Disposition},
    handlers::HandlerRegistry,
    models::notification::{NotificationEnvelope, NotificationKind},
    utils::shutdown_requested_within,
};

/// Stateless pipeline runner; safe to share between workers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, body: &[u8]) -> Result<NotificationKind, DispatchError> {
        let envelope = NotificationEnvelope::from_slice(body)
            .map_err(|e| DispatchError::MalformedEnvelope(e.to_string()))?;

        let kind = envelope.kind.clone();
        let mut handler = self.registry.resolve(&kind)?;

        debug!(envelope_id = %envelope.id, kind = %kind, "Handler resolved");

        handler
            .parse_payload(envelope.raw_payload())
            .map_err(|e| DispatchError::from_handler(kind.clone(), e))?;

        if !handler.validate_payload() {
            return Err(DispatchError::ValidationFailed { kind });
        }

        handler
            .execute_task()
            .await
            .map_err(|e| DispatchError::from_handler(kind.clone(), e))?;

        Ok(kind)
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_name: String,
    pub max_delivery_attempts: u32,
    pub restart_delay: Duration,
}

impl DispatcherConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_name: config.notification_queue_name.clone(),
            max_delivery_attempts: config.max_delivery_attempts,
            restart_delay: config.consumer_restart_delay(),
        }
    }

    fn restart_backoff(&self, consecutive_failures: u32) -> Duration {
        self.restart_delay
            .saturating_mul(1 << consecutive_failures.min(MAX_RESTART_DOUBLINGS))
    }
}

const MAX_RESTART_DOUBLINGS: u32 = 5;

pub struct DispatcherWorker {
    id: usize,
    broker: Arc<dyn MessageBroker>,
    dispatcher: Dispatcher,
    config: DispatcherConfig,
}

impl DispatcherWorker {
    pub fn new(
        id: usize,
        broker: Arc<dyn MessageBroker>,
        dispatcher: Dispatcher,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            id,
            broker,
            dispatcher,
            config,
        }
    }

    /// Consumes until `shutdown` flips to `true`. The message in flight when
    /// shutdown arrives is finished and settled first.
    ///
    /// A failed subscription or a delivery stream that ends (broker channel
    /// or connection lost) is followed by a fresh `consume` after a backoff,
    /// so the worker only ever stops on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let consumer_tag = format!("notification_dispatcher_{}", self.id);
        let mut consecutive_failures = 0;

        while !*shutdown.borrow() {
            match self
                .broker
                .consume(&self.config.queue_name, &consumer_tag)
                .await
            {
                Ok(mut deliveries) => {
                    info!(
                        worker = self.id,
                        queue = %self.config.queue_name,
                        "Dispatcher worker consuming"
                    );

                    match self.drain(&mut deliveries, &mut shutdown).await {
                        StreamOutcome::Shutdown => break,
                        StreamOutcome::Closed { delivered } => {
                            if delivered {
                                consecutive_failures = 0;
                            }
                            warn!(worker = self.id, "Delivery stream closed, resubscribing");
                        }
                    }
                }
                Err(e) => {
                    error!(worker = self.id, error = %e, "Failed to subscribe to queue");
                }
            }

            let backoff = self.config.restart_backoff(consecutive_failures);
            consecutive_failures = consecutive_failures.saturating_add(1);

            if shutdown_requested_within(backoff, &mut shutdown).await {
                break;
            }
        }

        info!(worker = self.id, "Dispatcher worker stopped");
    }

    async fn drain(
        &self,
        deliveries: &mut DeliveryStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StreamOutcome {
        let mut delivered = false;

        loop {
            if *shutdown.borrow() {
                return StreamOutcome::Shutdown;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return StreamOutcome::Shutdown;
                    }
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        delivered = true;
                        self.handle_delivery(delivery).await;
                    }
                    Some(Err(e)) => {
                        error!(worker = self.id, error = %e, "Failed to receive delivery");
                        if shutdown_requested_within(self.config.restart_delay, shutdown).await {
                            return StreamOutcome::Shutdown;
                        }
                    }
                    None => return StreamOutcome::Closed { delivered },
                },
            }
        }
    }

    pub async fn handle_delivery(&self, delivery: Delivery) {
        let attempt = delivery.attempt;

        let result = self.dispatcher.dispatch(&delivery.body).await;

        let settled = match result {
            Ok(kind) => {
                info!(worker = self.id, kind = %kind, attempt, "Notification delivered");
                delivery.ack().await
            }
            Err(e) => match e.disposition() {
                Disposition::Retry if attempt >= self.config.max_delivery_attempts => {
                    error!(
                        worker = self.id,
                        attempt,
                        error = %e,
                        "Delivery attempts exhausted, moving message to dead-letter queue"
                    );
                    delivery.dead_letter(e.to_string()).await
                }
                Disposition::Retry => {
                    warn!(
                        worker = self.id,
                        attempt,
                        max_attempts = self.config.max_delivery_attempts,
                        error = %e,
                        "Transient delivery failure, scheduling redelivery"
                    );
                    delivery.retry().await
                }
                Disposition::DeadLetter => {
                    error!(worker = self.id, error = %e, "Delivery rejected, moving message to dead-letter queue");
                    delivery.dead_letter(e.to_string()).await
                }
                Disposition::Discard => {
                    log_discard(self.id, &e);
                    delivery.reject().await
                }
            },
        };

        if let Err(e) = settled {
            error!(worker = self.id, error = %e, "Failed to settle delivery");
        }
    }
}

enum StreamOutcome {
    Shutdown,
    Closed { delivered: bool },
}

fn log_discard(worker: usize, error: &DispatchError) {
    match error {
        DispatchError::ValidationFailed { .. } => {
            warn!(worker, error = %error, "Notification failed validation, discarding");
        }
        DispatchError::UnknownKind(kind) => {
            error!(
                worker,
                kind = %kind,
                "Unknown notification kind, discarding (publisher and dispatcher versions differ)"
            );
        }
        _ => {
            error!(worker, error = %error, "Malformed notification, discarding");
        }
    }
}
