//! Per-kind notification handlers and the registry that resolves them.
//!
//! A handler instance is created fresh for every dispatched message and walks
//! a fixed lifecycle: `parse_payload`, then `validate_payload`, then
//! `execute_task`. Instances never outlive the message they were created for,
//! so they may keep the parsed payload as plain owned state.

pub mod email;
pub mod registry;

use async_trait::async_trait;

use crate::{error::HandlerError, models::notification::NotificationKind};

pub use email::EmailHandler;
pub use registry::HandlerRegistry;

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    fn kind(&self) -> NotificationKind;

    /// Deserializes the raw envelope payload into the handler's typed form.
    ///
    /// Fails with [`HandlerError::MalformedPayload`] when `raw` does not have
    /// the expected shape. Missing optional business fields are not a parse
    /// failure; `validate_payload` reports those.
    fn parse_payload(&mut self, raw: &str) -> Result<(), HandlerError>;

    /// Side-effect free business-rule check of the parsed payload.
    ///
    /// Precondition: `parse_payload` succeeded. Without a parsed payload this
    /// returns `false`.
    fn validate_payload(&self) -> bool;

    /// Performs the delivery side effect.
    ///
    /// May run more than once for the same payload under at-least-once
    /// delivery; each call is an independent attempt.
    async fn execute_task(&self) -> Result<(), HandlerError>;
}
