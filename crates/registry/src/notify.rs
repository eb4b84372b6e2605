//! Outbound notifications.
//!
//! The engine decides *that* something must be announced and hands a
//! `Notification` to an emitter after the guarded commit. Delivery is the
//! emitter's business; consumers dedupe on `(kind, ref_id)`.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// `ref_id` is the reservation.
    ReservationCreated,
    /// `ref_id` is the contribution.
    ContributionReceived,
    /// `ref_id` is the group gift.
    CampaignCompleted,
    /// `ref_id` is the transaction.
    TransactionSucceeded,
    /// `ref_id` is the transaction.
    TransactionFailed,
    /// `ref_id` is the thank-you note.
    ThankYouNoteCreated,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ReservationCreated => "ReservationCreated",
            NotificationKind::ContributionReceived => "ContributionReceived",
            NotificationKind::CampaignCompleted => "CampaignCompleted",
            NotificationKind::TransactionSucceeded => "TransactionSucceeded",
            NotificationKind::TransactionFailed => "TransactionFailed",
            NotificationKind::ThankYouNoteCreated => "ThankYouNoteCreated",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique per emission; redeliveries of the same fact share `dedupe_key`.
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub ref_id: i64,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, ref_id: impl Into<i64>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            ref_id: ref_id.into(),
            timestamp,
        }
    }

    pub fn dedupe_key(&self) -> (NotificationKind, i64) {
        (self.kind, self.ref_id)
    }
}

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct EmitError(pub String);

/// Receiver of engine notifications.
#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    async fn emit(&self, notification: Notification) -> Result<(), EmitError>;
}

#[derive(Debug, Default)]
struct InMemoryEmitterState {
    sent: Vec<Notification>,
    fail_on_emit: bool,
}

/// Emitter that keeps every notification in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationEmitter {
    state: Arc<RwLock<InMemoryEmitterState>>,
}

impl InMemoryNotificationEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the emitter to reject subsequent notifications.
    pub fn set_fail_on_emit(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_emit = fail;
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.of_kind(kind).len()
    }

    pub fn clear(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clear();
    }
}

#[async_trait]
impl NotificationEmitter for InMemoryNotificationEmitter {
    async fn emit(&self, notification: Notification) -> Result<(), EmitError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_emit {
            return Err(EmitError(format!("rejected {}", notification.kind)));
        }
        state.sent.push(notification);
        Ok(())
    }
}

/// Emitter that writes each notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationEmitter;

#[async_trait]
impl NotificationEmitter for TracingNotificationEmitter {
    async fn emit(&self, notification: Notification) -> Result<(), EmitError> {
        tracing::info!(
            event_id = %notification.event_id,
            kind = %notification.kind,
            ref_id = notification.ref_id,
            "notification emitted"
        );
        Ok(())
    }
}
