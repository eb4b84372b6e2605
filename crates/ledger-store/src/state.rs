//! Status state machines for reservations, campaigns and transactions.
//!
//! Each status type carries its full transition table. Stores persist the
//! `as_str` form and parse it back with `FromStr`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// Lifecycle of an exclusive hold on gift units.
///
/// ```text
/// Active ──┬──► Completed
///          ├──► Expired
///          └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Units are held for the reserving user.
    #[default]
    Active,
    /// The linked payment succeeded; units were sold (terminal).
    Completed,
    /// The hold deadline passed before payment (terminal).
    Expired,
    /// Released explicitly or because payment failed (terminal).
    Cancelled,
}

impl ReservationStatus {
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        match (self, next) {
            (Active, Completed) | (Active, Expired) | (Active, Cancelled) => true,
            (Active, Active) => false,
            (Completed | Expired | Cancelled, _) => false,
        }
    }

    /// Whether the reservation still counts against available stock.
    pub fn holds_stock(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle of a crowdfunding campaign.
///
/// ```text
/// Active ──┬──► Completed
///          └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupGiftStatus {
    #[default]
    Active,
    /// Funding reached the target (terminal).
    Completed,
    /// The expiry date passed below target (terminal).
    Expired,
}

impl GroupGiftStatus {
    pub fn can_transition_to(&self, next: GroupGiftStatus) -> bool {
        use GroupGiftStatus::*;
        match (self, next) {
            (Active, Completed) | (Active, Expired) => true,
            (Active, Active) => false,
            (Completed | Expired, _) => false,
        }
    }

    pub fn accepts_contributions(&self) -> bool {
        matches!(self, GroupGiftStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GroupGiftStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupGiftStatus::Active => "active",
            GroupGiftStatus::Completed => "completed",
            GroupGiftStatus::Expired => "expired",
        }
    }
}

/// Lifecycle of a payment record. Exactly one terminal transition.
///
/// ```text
/// Pending ──┬──► Succeeded
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

impl TransactionStatus {
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Pending, Succeeded) | (Pending, Failed) => true,
            (Pending, Pending) => false,
            (Succeeded | Failed, _) => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
        }
    }
}

/// Terminal result reported by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn as_status(&self) -> TransactionStatus {
        match self {
            Outcome::Succeeded => TransactionStatus::Succeeded,
            Outcome::Failed => TransactionStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.as_status().as_str()
    }
}

/// Who may see and reserve from a gift list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

macro_rules! status_text {
    ($($ty:ident { $($text:literal => $variant:ident),+ $(,)? })+) => {
        $(
            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.as_str())
                }
            }

            impl FromStr for $ty {
                type Err = LedgerError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    match s {
                        $($text => Ok($ty::$variant),)+
                        other => Err(LedgerError::InvalidData(format!(
                            "unknown {} value: {other:?}",
                            stringify!($ty)
                        ))),
                    }
                }
            }
        )+
    };
}

status_text! {
    ReservationStatus {
        "active" => Active,
        "completed" => Completed,
        "expired" => Expired,
        "cancelled" => Cancelled,
    }
    GroupGiftStatus {
        "active" => Active,
        "completed" => Completed,
        "expired" => Expired,
    }
    TransactionStatus {
        "pending" => Pending,
        "succeeded" => Succeeded,
        "failed" => Failed,
    }
    Visibility {
        "public" => Public,
        "private" => Private,
    }
}
