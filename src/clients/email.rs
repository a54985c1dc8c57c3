use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{config::Config, error::ProviderError, models::email::OutgoingEmail};

/// Delivery capability used by the email handler.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<(), ProviderError>;

    fn name(&self) -> &'static str;
}

pub struct SendGridProvider {
    http_client: Client,
    api_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct SendGridRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: EmailAddress<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<EmailAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    email: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

impl SendGridProvider {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_base_url(&config.sendgrid_api_url, &config.sendgrid_api_key)
    }

    pub fn with_base_url(api_url: &str, api_key: &str) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(api_url, "SendGrid provider initialized");

        Ok(Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn build_request<'a>(email: &'a OutgoingEmail) -> SendGridRequest<'a> {
        let mut content = vec![Content {
            content_type: "text/plain",
            value: &email.text,
        }];

        if let Some(html) = &email.html {
            content.push(Content {
                content_type: "text/html",
                value: html,
            });
        }

        SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: &email.to,
                    name: None,
                }],
            }],
            from: EmailAddress {
                email: &email.from.email,
                name: email.from.name.as_deref(),
            },
            subject: &email.subject,
            content,
        }
    }
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<(), ProviderError> {
        debug!(to = %email.to, subject = %email.subject, "Sending email via SendGrid");

        let response = self
            .http_client
            .post(format!("{}/v3/mail/send", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&Self::build_request(email))
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            info!(to = %email.to, "Email accepted by SendGrid");
            return Ok(());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("SendGrid rate limit hit");
            return Err(ProviderError::RateLimited);
        }

        if status.is_server_error() {
            return Err(ProviderError::Unavailable(status.as_u16()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }
}
