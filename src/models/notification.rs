use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::{RawValue, to_raw_value};
use uuid::Uuid;

/// Routing discriminator shared by publishers and the handler registry.
///
/// Unrecognised names are kept as `Other` so that an envelope from a newer
/// publisher still decodes and is rejected at handler resolution instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    Email,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::Email => "EMAIL",
            NotificationKind::Other(name) => name,
        }
    }
}

impl From<String> for NotificationKind {
    fn from(name: String) -> Self {
        if name.eq_ignore_ascii_case("EMAIL") {
            NotificationKind::Email
        } else {
            NotificationKind::Other(name)
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Email => "EMAIL".to_string(),
            NotificationKind::Other(name) => name,
        }
    }
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// The kind-tagged unit that travels through the broker. The payload stays
/// serialized until the handler for `kind` parses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub kind: NotificationKind,
    #[serde(default = "null_payload")]
    pub payload: Box<RawValue>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl NotificationEnvelope {
    pub fn new<T: Serialize>(kind: NotificationKind, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            payload: to_raw_value(payload)?,
            created_at: Utc::now(),
        })
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn raw_payload(&self) -> &str {
        self.payload.get()
    }
}

fn null_payload() -> Box<RawValue> {
    RawValue::NULL.to_owned()
}
