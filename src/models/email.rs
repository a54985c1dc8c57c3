use serde::{Deserialize, Serialize};

/// Payload carried by `EMAIL` envelopes.
///
/// Fields are optional on the wire: a missing recipient or body is a
/// validation failure, not a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
}

impl EmailNotification {
    pub fn new(recipient_email: impl Into<String>, text_content: impl Into<String>) -> Self {
        Self {
            recipient_email: Some(recipient_email.into()),
            subject: None,
            text_content: Some(text_content.into()),
            html_content: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_html(mut self, html_content: impl Into<String>) -> Self {
        self.html_content = Some(html_content.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mailbox {
    pub email: String,
    pub name: Option<String>,
}

/// A fully resolved message handed to an email provider.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub from: Mailbox,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}
