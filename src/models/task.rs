use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,

    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Notified,
    Completed,
    /// Any status this client does not know yet; such tasks are skipped.
    #[serde(other)]
    Unknown,
}

/// An outstanding obligation owned by the task API, e.g. a graduation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTask {
    pub id: String,
    pub user: User,
    pub status: TaskStatus,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn ending_now(lookback: Duration) -> Self {
        let to = Utc::now();
        let lookback = TimeDelta::from_std(lookback).unwrap_or(TimeDelta::zero());

        Self {
            from: to - lookback,
            to,
        }
    }

    pub fn query_params(&self) -> [(&'static str, String); 2] {
        [
            ("from", self.from.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("to", self.to.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusUpdate {
    pub status: TaskStatus,
}
