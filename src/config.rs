use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::retry::RetryConfig;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_notification_queue_name")]
    pub notification_queue_name: String,
    #[serde(default = "default_retry_queue_name")]
    pub retry_queue_name: String,
    #[serde(default = "default_failed_queue_name")]
    pub failed_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u32,
    #[serde(default = "default_consumer_restart_delay_ms")]
    pub consumer_restart_delay_ms: u64,

    pub sendgrid_api_key: String,
    #[serde(default = "default_sendgrid_api_url")]
    pub sendgrid_api_url: String,
    pub email_from_address: String,
    #[serde(default = "default_email_from_name")]
    pub email_from_name: String,
    #[serde(default = "default_email_subject")]
    pub default_email_subject: String,

    pub task_api_url: String,
    #[serde(default)]
    pub task_api_token: Option<String>,

    #[serde(default = "default_true")]
    pub graduation_worker_enabled: bool,
    #[serde(default = "default_graduation_startup_delay_seconds")]
    pub graduation_startup_delay_seconds: u64,
    #[serde(default = "default_graduation_interval_seconds")]
    pub graduation_interval_seconds: u64,
    #[serde(default = "default_graduation_lookback_hours")]
    pub graduation_lookback_hours: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub json_logs: bool,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        if config.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }

        if config.max_delivery_attempts == 0 {
            return Err(anyhow!("MAX_DELIVERY_ATTEMPTS must be at least 1"));
        }

        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn consumer_restart_delay(&self) -> Duration {
        Duration::from_millis(self.consumer_restart_delay_ms)
    }

    pub fn graduation_startup_delay(&self) -> Duration {
        Duration::from_secs(self.graduation_startup_delay_seconds)
    }

    pub fn graduation_interval(&self) -> Duration {
        Duration::from_secs(self.graduation_interval_seconds)
    }

    pub fn graduation_lookback(&self) -> Duration {
        Duration::from_secs(self.graduation_lookback_hours.saturating_mul(3600))
    }
}

fn default_notification_queue_name() -> String {
    "notifications".to_string()
}

fn default_retry_queue_name() -> String {
    "notifications.retry".to_string()
}

fn default_failed_queue_name() -> String {
    "notifications.failed".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u32 {
    30_000
}

fn default_consumer_restart_delay_ms() -> u64 {
    1000
}

fn default_sendgrid_api_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_email_from_name() -> String {
    "Notifications".to_string()
}

fn default_email_subject() -> String {
    "Notification".to_string()
}

fn default_true() -> bool {
    true
}

fn default_graduation_startup_delay_seconds() -> u64 {
    30
}

fn default_graduation_interval_seconds() -> u64 {
    6 * 3600
}

fn default_graduation_lookback_hours() -> u64 {
    24
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8080
}
