use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Record published to the failed queue once a message is given up on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub envelope: String,
    pub failure_reason: String,
    pub attempts: u32,
    pub failed_at: String,
}

impl DeadLetter {
    pub fn new(body: &[u8], failure_reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            envelope: String::from_utf8_lossy(body).into_owned(),
            failure_reason: failure_reason.into(),
            attempts,
            failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
