use std::time::{Duration, Instant};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use tracing::{debug, info};

use crate::{
    config::Config,
    error::ApiError,
    models::{
        retry::RetryConfig,
        task::{TaskStatus, TaskStatusUpdate, TimeRange, UserTask},
    },
    utils::retry_with_backoff_when,
};

/// The external API the graduation worker reads work items from.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn get_due_tasks(&self, range: &TimeRange) -> Result<Vec<UserTask>, ApiError>;

    async fn mark_task_handled(&self, task_id: &str) -> Result<(), ApiError>;
}

pub struct TaskApiClient {
    http_client: Client,
    base_url: String,
    token: Option<String>,
    retry_config: RetryConfig,
}

impl TaskApiClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_base_url(
            &config.task_api_url,
            config.task_api_token.clone(),
            config.retry_config(),
        )
    }

    pub fn with_base_url(
        base_url: &str,
        token: Option<String>,
        retry_config: RetryConfig,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(base_url, "Task API client initialized");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retry_config,
        })
    }

    /// Round-trip time of a bare request to the API root. Any HTTP answer
    /// counts as reachable.
    pub async fn ping(&self) -> Result<u64, ApiError> {
        let start = Instant::now();

        self.request(Method::GET, &self.base_url)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        Ok(start.elapsed().as_millis() as u64)
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ApiError::Request(format!("invalid task API URL: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| ApiError::Request("task API URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.http_client.request(method, url);

        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(response: Response) -> Result<Response, ApiError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl TaskApi for TaskApiClient {
    async fn get_due_tasks(&self, range: &TimeRange) -> Result<Vec<UserTask>, ApiError> {
        let url = self.endpoint(&["api", "v1", "user-tasks", "due"])?;
        let params = range.query_params();

        debug!(from = %range.from, to = %range.to, "Fetching due tasks");

        retry_with_backoff_when(&self.retry_config, ApiError::is_transient, || {
            let request = self.request(Method::GET, url.as_str()).query(&params[..]);

            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| ApiError::Request(e.to_string()))?;

                Self::check_status(response)
                    .await?
                    .json::<Vec<UserTask>>()
                    .await
                    .map_err(|e| ApiError::Decode(e.to_string()))
            }
        })
        .await
    }

    async fn mark_task_handled(&self, task_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "v1", "user-tasks", task_id, "status"])?;
        let update = TaskStatusUpdate {
            status: TaskStatus::Notified,
        };

        debug!(task_id, "Marking task as notified");

        retry_with_backoff_when(&self.retry_config, ApiError::is_transient, || {
            let request = self.request(Method::PATCH, url.as_str()).json(&update);

            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| ApiError::Request(e.to_string()))?;

                Self::check_status(response).await?;
                Ok(())
            }
        })
        .await
    }
}
