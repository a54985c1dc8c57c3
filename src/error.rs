use thiserror::Error;

use crate::models::notification::NotificationKind;

/// Failure reported by a delivery provider such as SendGrid.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Email provider unreachable: {0}")]
    Unreachable(String),

    #[error("Email provider rate limited the request")]
    RateLimited,

    #[error("Email provider unavailable (status {0})")]
    Unavailable(u16),

    #[error("Email provider rejected the message (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

impl ProviderError {
    /// Everything except an explicit rejection may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::Rejected { .. })
    }
}

/// Failure raised by a notification handler during one lifecycle step.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Payload has not been parsed")]
    NotParsed,

    #[error("Delivery failed: {0}")]
    Delivery(#[from] ProviderError),
}

/// What the consumer loop does with a message after a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove from the queue without redelivery.
    Discard,
    /// Hand back to the broker for delayed redelivery.
    Retry,
    /// Park in the dead-letter queue for operators.
    DeadLetter,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("No handler registered for notification kind {0}")]
    UnknownKind(NotificationKind),

    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload {
        kind: NotificationKind,
        reason: String,
    },

    #[error("{kind} payload failed validation")]
    ValidationFailed { kind: NotificationKind },

    #[error("{kind} delivery failed: {source}")]
    DeliveryFailed {
        kind: NotificationKind,
        source: ProviderError,
    },
}

impl DispatchError {
    pub fn from_handler(kind: NotificationKind, error: HandlerError) -> Self {
        match error {
            HandlerError::MalformedPayload(reason) => DispatchError::MalformedPayload { kind, reason },
            HandlerError::NotParsed => DispatchError::MalformedPayload {
                kind,
                reason: HandlerError::NotParsed.to_string(),
            },
            HandlerError::Delivery(source) => DispatchError::DeliveryFailed { kind, source },
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            DispatchError::DeliveryFailed { source, .. } if source.is_transient() => {
                Disposition::Retry
            }
            DispatchError::DeliveryFailed { .. } => Disposition::DeadLetter,
            _ => Disposition::Discard,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Failed to publish to {routing_key}: {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("Failed to consume from {routing_key}: {reason}")]
    Consume { routing_key: String, reason: String },

    #[error("Failed to settle delivery: {0}")]
    Acknowledge(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure talking to the external task API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Task API request failed: {0}")]
    Request(String),

    #[error("Task API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Task API response could not be decoded: {0}")]
    Decode(String),
}

impl ApiError {
    /// Network failures, timeouts, throttling and 5xx may clear on retry;
    /// other statuses and undecodable bodies will not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Request(_) => true,
            ApiError::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            ApiError::Decode(_) => false,
        }
    }
}
