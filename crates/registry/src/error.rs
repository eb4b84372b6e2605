//! Engine error types.

use common::{GiftId, GroupGiftId, TransactionId, UserId};
use ledger_store::{EntityKind, GroupGiftStatus, LedgerError, Money, TransactionStatus};
use thiserror::Error;

/// Errors surfaced by the registry engine.
///
/// Everything except `Store` is a business-rule outcome the caller can act
/// on. `Contention` is only returned after the internal retry bound is spent.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: i64 },

    #[error("Insufficient stock for gift {gift_id}: requested {requested}, available {available}")]
    InsufficientStock {
        gift_id: GiftId,
        requested: u32,
        available: u32,
    },

    #[error("Contribution of {amount} is below the minimum of {minimum} (remaining {remaining})")]
    BelowMinimum {
        amount: Money,
        minimum: Money,
        remaining: Money,
    },

    #[error("Campaign {group_gift_id} is not accepting contributions ({status})")]
    CampaignNotActive {
        group_gift_id: GroupGiftId,
        status: GroupGiftStatus,
    },

    #[error("{entity} {id} is already {status}")]
    AlreadyTerminal {
        entity: EntityKind,
        id: i64,
        status: &'static str,
    },

    #[error("User {actor} may not act on {entity} {id}")]
    NotOwner {
        entity: EntityKind,
        id: i64,
        actor: UserId,
    },

    /// Compare-and-update retries were exhausted.
    #[error("Gave up after {attempts} conflicting attempts")]
    Contention { attempts: u32 },

    #[error("Quantity must be at least 1, got {quantity}")]
    InvalidQuantity { quantity: u32 },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: Money },

    #[error("Gift {gift_id} is a group gift and cannot be reserved")]
    NotReservable { gift_id: GiftId },

    #[error("Gift {gift_id} is not a group gift")]
    NotGroupGift { gift_id: GiftId },

    #[error("Gift {gift_id} already has campaign {group_gift_id}")]
    CampaignExists {
        gift_id: GiftId,
        group_gift_id: GroupGiftId,
    },

    #[error("Transaction {transaction_id} is {status}, not succeeded")]
    NotSettled {
        transaction_id: TransactionId,
        status: TransactionStatus,
    },

    /// The transaction belongs to a live reservation or a contribution and
    /// must be settled through its manager.
    #[error("Transaction {transaction_id} is managed by its {scope}")]
    ManagedTransaction {
        transaction_id: TransactionId,
        scope: &'static str,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Ledger store error: {0}")]
    Store(#[from] LedgerError),
}

impl RegistryError {
    pub(crate) fn not_found(entity: EntityKind, id: impl Into<i64>) -> Self {
        RegistryError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable code for callers translating errors into
    /// user-facing messages.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::NotFound { .. } => "not_found",
            RegistryError::InsufficientStock { .. } => "insufficient_stock",
            RegistryError::BelowMinimum { .. } => "below_minimum",
            RegistryError::CampaignNotActive { .. } => "campaign_not_active",
            RegistryError::AlreadyTerminal { .. } => "already_terminal",
            RegistryError::NotOwner { .. } => "not_owner",
            RegistryError::Contention { .. } => "contention",
            RegistryError::InvalidQuantity { .. } => "invalid_quantity",
            RegistryError::InvalidAmount { .. } => "invalid_amount",
            RegistryError::NotReservable { .. } => "not_reservable",
            RegistryError::NotGroupGift { .. } => "not_group_gift",
            RegistryError::CampaignExists { .. } => "campaign_exists",
            RegistryError::NotSettled { .. } => "not_settled",
            RegistryError::ManagedTransaction { .. } => "managed_transaction",
            RegistryError::Validation(_) => "validation",
            RegistryError::Store(_) => "store",
        }
    }

    /// Whether the error is a ledger version conflict worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::Store(e) if e.is_conflict())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
