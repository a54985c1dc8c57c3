use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    clients::email::EmailProvider,
    config::Config,
    error::HandlerError,
    handlers::{HandlerRegistry, NotificationHandler},
    models::{
        email::{EmailNotification, Mailbox, OutgoingEmail},
        notification::NotificationKind,
        validation::{validate_email_address, validate_text_content},
    },
};

/// Sender identity and defaults shared by every email handler instance.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub from: Mailbox,
    pub default_subject: String,
}

impl EmailSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            from: Mailbox {
                email: config.email_from_address.clone(),
                name: Some(config.email_from_name.clone()),
            },
            default_subject: config.default_email_subject.clone(),
        }
    }
}

pub struct EmailHandler {
    provider: Arc<dyn EmailProvider>,
    settings: Arc<EmailSettings>,
    payload: Option<EmailNotification>,
}

impl EmailHandler {
    pub fn new(provider: Arc<dyn EmailProvider>, settings: Arc<EmailSettings>) -> Self {
        Self {
            provider,
            settings,
            payload: None,
        }
    }

    pub fn payload(&self) -> Option<&EmailNotification> {
        self.payload.as_ref()
    }

    fn outgoing(&self, payload: &EmailNotification) -> OutgoingEmail {
        OutgoingEmail {
            from: self.settings.from.clone(),
            to: payload.recipient_email.clone().unwrap_or_default(),
            subject: payload
                .subject
                .clone()
                .filter(|subject| !subject.trim().is_empty())
                .unwrap_or_else(|| self.settings.default_subject.clone()),
            text: payload.text_content.clone().unwrap_or_default(),
            html: payload.html_content.clone(),
        }
    }
}

pub fn register_email_handler(
    registry: &mut HandlerRegistry,
    provider: Arc<dyn EmailProvider>,
    settings: EmailSettings,
) {
    let settings = Arc::new(settings);

    registry.register(NotificationKind::Email, move || {
        Box::new(EmailHandler::new(provider.clone(), settings.clone()))
    });
}

#[async_trait]
impl NotificationHandler for EmailHandler {
    fn kind(&self) -> NotificationKind {
        NotificationKind::Email
    }

    fn parse_payload(&mut self, raw: &str) -> Result<(), HandlerError> {
        self.payload = None;

        let payload = serde_json::from_str::<EmailNotification>(raw)
            .map_err(|e| HandlerError::MalformedPayload(e.to_string()))?;

        self.payload = Some(payload);
        Ok(())
    }

    fn validate_payload(&self) -> bool {
        let Some(payload) = &self.payload else {
            return false;
        };

        let recipient = payload.recipient_email.as_deref().unwrap_or_default();
        if let Err(e) = validate_email_address(recipient) {
            warn!(error = %e, "Invalid email recipient");
            return false;
        }

        let text = payload.text_content.as_deref().unwrap_or_default();
        if let Err(e) = validate_text_content(text) {
            warn!(error = %e, "Invalid email body");
            return false;
        }

        true
    }

    async fn execute_task(&self) -> Result<(), HandlerError> {
        let payload = self.payload.as_ref().ok_or(HandlerError::NotParsed)?;
        let email = self.outgoing(payload);

        debug!(provider = self.provider.name(), to = %email.to, "Delivering email notification");

        self.provider.send_email(&email).await?;
        Ok(())
    }
}
