use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{StreamExt, stream};
use notification_service::{
    clients::{
        broker::{Delivery, DeliveryAcker, DeliveryStream, MessageBroker},
        email::EmailProvider,
        task_api::TaskApi,
    },
    error::{ApiError, BrokerError, ProviderError},
    models::{
        email::{Mailbox, OutgoingEmail},
        message::DeadLetter,
        task::{TaskStatus, TimeRange, User, UserTask},
    },
};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};

pub const QUEUE: &str = "notifications";

#[derive(Debug, Clone)]
pub enum Settlement {
    Acked,
    Rejected,
    Retried { next_attempt: u32 },
    DeadLettered(DeadLetter),
}

type QueuedMessage = (Vec<u8>, u32);

struct Queue {
    sender: mpsc::UnboundedSender<QueuedMessage>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<QueuedMessage>>>,
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, Queue>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    settlements: Mutex<Vec<Settlement>>,
    fail_publish: AtomicBool,
}

/// Broker double: one unbounded channel per routing key, shared by every
/// consumer of that key, with retries fed straight back into the queue.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self, routing_key: &str) -> Vec<serde_json::Value> {
        self.state
            .published
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, body)| serde_json::from_slice(body).unwrap())
            .collect()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.settlements.lock().unwrap().clone()
    }

    pub async fn wait_for_settlements(&self, count: usize) -> Vec<Settlement> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let settlements = self.settlements();
                if settlements.len() >= count {
                    return settlements;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} settlements, got {:?}", self.settlements()))
    }

    fn enqueue(&self, routing_key: &str, body: Vec<u8>, attempt: u32) {
        let mut queues = self.state.queues.lock().unwrap();
        let queue = queues
            .entry(routing_key.to_string())
            .or_insert_with(new_queue);
        queue.sender.send((body, attempt)).unwrap();
    }

    fn receiver(&self, routing_key: &str) -> Arc<AsyncMutex<mpsc::UnboundedReceiver<QueuedMessage>>> {
        let mut queues = self.state.queues.lock().unwrap();
        queues
            .entry(routing_key.to_string())
            .or_insert_with(new_queue)
            .receiver
            .clone()
    }

    fn settle(&self, settlement: Settlement) {
        self.state.settlements.lock().unwrap().push(settlement);
    }
}

fn new_queue() -> Queue {
    let (sender, receiver) = mpsc::unbounded_channel();
    Queue {
        sender,
        receiver: Arc::new(AsyncMutex::new(receiver)),
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish {
                routing_key: routing_key.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }

        self.state
            .published
            .lock()
            .unwrap()
            .push((routing_key.to_string(), body.to_vec()));
        self.enqueue(routing_key, body.to_vec(), 1);
        Ok(())
    }

    async fn consume(
        &self,
        routing_key: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let receiver = self.receiver(routing_key);
        let broker = self.clone();
        let routing_key = routing_key.to_string();

        let deliveries = stream::unfold(receiver, move |receiver| {
            let broker = broker.clone();
            let routing_key = routing_key.clone();

            async move {
                let next = receiver.lock().await.recv().await;
                next.map(|(body, attempt)| {
                    let acker = InMemoryAcker {
                        broker,
                        routing_key,
                    };
                    (Ok::<_, BrokerError>(Delivery::new(body, attempt, Box::new(acker))), receiver)
                })
            }
        });

        Ok(deliveries.boxed())
    }
}

struct InMemoryAcker {
    broker: InMemoryBroker,
    routing_key: String,
}

#[async_trait]
impl DeliveryAcker for InMemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.broker.settle(Settlement::Acked);
        Ok(())
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        self.broker.settle(Settlement::Rejected);
        Ok(())
    }

    async fn retry(&self, body: &[u8], next_attempt: u32) -> Result<(), BrokerError> {
        self.broker.settle(Settlement::Retried { next_attempt });
        self.broker
            .enqueue(&self.routing_key, body.to_vec(), next_attempt);
        Ok(())
    }

    async fn dead_letter(&self, record: &DeadLetter) -> Result<(), BrokerError> {
        self.broker.settle(Settlement::DeadLettered(record.clone()));
        Ok(())
    }
}

/// Email provider double that records every attempt and can be scripted to
/// fail the next few sends.
#[derive(Default)]
pub struct RecordingEmailProvider {
    sent: Mutex<Vec<OutgoingEmail>>,
    failures: Mutex<VecDeque<ProviderError>>,
    attempts: AtomicUsize,
}

impl RecordingEmailProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_with(errors: impl IntoIterator<Item = ProviderError>) -> Arc<Self> {
        let provider = Self::default();
        provider.failures.lock().unwrap().extend(errors);
        Arc::new(provider)
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailProvider for RecordingEmailProvider {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<(), ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Email provider whose sends block until the test releases them.
#[derive(Default)]
pub struct GatedEmailProvider {
    sending: Notify,
    gate: Notify,
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl GatedEmailProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn wait_until_sending(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.sending.notified())
            .await
            .expect("no send was started");
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for GatedEmailProvider {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<(), ProviderError> {
        self.sending.notify_one();
        self.gate.notified().await;

        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Task API double with scripted query failures.
#[derive(Default)]
pub struct FakeTaskApi {
    tasks: Mutex<Vec<UserTask>>,
    failing_queries: Mutex<VecDeque<ApiError>>,
    failing_marks: Mutex<Vec<String>>,
    queries: AtomicUsize,
    marked: Mutex<Vec<String>>,
}

impl FakeTaskApi {
    pub fn with_tasks(tasks: Vec<UserTask>) -> Arc<Self> {
        let api = Self::default();
        *api.tasks.lock().unwrap() = tasks;
        Arc::new(api)
    }

    pub fn fail_next_query(&self, error: ApiError) {
        self.failing_queries.lock().unwrap().push_back(error);
    }

    pub fn fail_mark_for(&self, task_id: &str) {
        self.failing_marks.lock().unwrap().push(task_id.to_string());
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskApi for FakeTaskApi {
    async fn get_due_tasks(&self, _range: &TimeRange) -> Result<Vec<UserTask>, ApiError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let failure = self.failing_queries.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn mark_task_handled(&self, task_id: &str) -> Result<(), ApiError> {
        let failing = self.failing_marks.lock().unwrap().iter().any(|id| id == task_id);
        if failing {
            return Err(ApiError::Status {
                status: 500,
                body: "update failed".to_string(),
            });
        }

        self.marked.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

pub fn pending_task(id: &str, email: &str) -> UserTask {
    UserTask {
        id: id.to_string(),
        user: User {
            id: format!("user-{}", id),
            email: email.to_string(),
            name: None,
        },
        status: TaskStatus::Pending,
        due_date: Utc::now(),
    }
}

pub fn sender() -> Mailbox {
    Mailbox {
        email: "registrar@school.edu".to_string(),
        name: Some("Registrar".to_string()),
    }
}
