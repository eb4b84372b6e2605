//! Collaborators shared by every manager.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledger_store::{EntityKind, LedgerStore, Versioned};

use crate::clock::{Clock, SystemClock};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::notify::{Notification, NotificationEmitter, NotificationKind, TracingNotificationEmitter};
use crate::retry::ConflictRetry;

/// Store, clock, emitter and retry policy, cloned into each manager.
#[derive(Clone)]
pub struct EngineContext<S> {
    store: S,
    clock: Arc<dyn Clock>,
    emitter: Arc<dyn NotificationEmitter>,
    retry: ConflictRetry,
}

impl<S: LedgerStore> EngineContext<S> {
    /// Creates a context on the system clock that logs notifications.
    pub fn new(store: S, config: &RegistryConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            emitter: Arc::new(TracingNotificationEmitter),
            retry: ConflictRetry::new(config.max_conflict_retries),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn NotificationEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn retry(&self) -> ConflictRetry {
        self.retry
    }

    /// Reserves an identifier and wraps it in its typed newtype.
    pub(crate) async fn next_id<T: From<i64>>(&self, kind: EntityKind) -> Result<T> {
        Ok(T::from(self.store.allocate_id(kind).await?))
    }

    /// Hands a notification to the emitter. Failures are logged; the mutation
    /// that triggered it has already committed.
    pub(crate) async fn notify(&self, kind: NotificationKind, ref_id: impl Into<i64>) {
        let notification = Notification::new(kind, ref_id, self.now());
        let event_id = notification.event_id;
        if let Err(err) = self.emitter.emit(notification).await {
            tracing::warn!(%kind, %event_id, error = %err, "notification emitter failed");
        }
    }
}

/// Turns a missing row into `NotFound`.
pub(crate) fn found<T>(
    row: Option<Versioned<T>>,
    entity: EntityKind,
    id: impl Into<i64>,
) -> Result<Versioned<T>> {
    row.ok_or_else(|| RegistryError::not_found(entity, id))
}
