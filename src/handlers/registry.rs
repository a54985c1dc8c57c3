use std::{collections::HashMap, sync::Arc};

use tracing::info;

use crate::{
    error::DispatchError, handlers::NotificationHandler, models::notification::NotificationKind,
};

pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn NotificationHandler> + Send + Sync>;

/// Maps a notification kind to a factory producing fresh handlers for it.
///
/// Built once at startup and shared read-only between dispatcher workers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<NotificationKind, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `kind`, replacing any previous registration.
    pub fn register<F>(&mut self, kind: NotificationKind, factory: F)
    where
        F: Fn() -> Box<dyn NotificationHandler> + Send + Sync + 'static,
    {
        info!(kind = %kind, "Notification handler registered");
        self.factories.insert(kind, Arc::new(factory));
    }

    pub fn resolve(&self, kind: &NotificationKind) -> Result<Box<dyn NotificationHandler>, DispatchError> {
        self.factories
            .get(kind)
            .map(|factory| factory())
            .ok_or_else(|| DispatchError::UnknownKind(kind.clone()))
    }

    pub fn contains(&self, kind: &NotificationKind) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &NotificationKind> {
        self.factories.keys()
    }
}
