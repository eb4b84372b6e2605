//! Rows owned by the ledger.

use chrono::{DateTime, Utc};
use common::{
    ContributionId, GiftId, GiftListId, GroupGiftId, ReservationId, ThankYouNoteId,
    TransactionId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::money::{Currency, Money};
use crate::state::{GroupGiftStatus, ReservationStatus, TransactionStatus, Visibility};

/// Kinds of rows held by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    GiftList,
    Gift,
    Reservation,
    GroupGift,
    Contribution,
    Transaction,
    ThankYouNote,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::GiftList => "gift_list",
            EntityKind::Gift => "gift",
            EntityKind::Reservation => "reservation",
            EntityKind::GroupGift => "group_gift",
            EntityKind::Contribution => "contribution",
            EntityKind::Transaction => "transaction",
            EntityKind::ThankYouNote => "thank_you_note",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registry owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftList {
    pub id: GiftListId,
    pub owner: UserId,
    pub title: String,
    pub visibility: Visibility,
    /// After this instant the list no longer accepts reservations.
    pub expires_at: Option<DateTime<Utc>>,
}

impl GiftList {
    /// Whether visitors may currently act on gifts of this list.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.visibility == Visibility::Public && self.expires_at.is_none_or(|at| now <= at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gift {
    pub id: GiftId,
    pub list_id: GiftListId,
    pub name: String,
    /// Unit price charged when a reservation is paid.
    pub price: Money,
    pub currency: Currency,
    /// Units offered. Never changes after creation.
    pub stock: u32,
    /// Units irreversibly transferred.
    pub sold: u32,
    pub is_group_gift: bool,
}

impl Gift {
    /// Units neither sold nor covered by the given active holds.
    pub fn available(&self, held: u32) -> u32 {
        self.stock.saturating_sub(self.sold).saturating_sub(held)
    }
}

/// An exclusive, time-bounded hold on units of a non-group gift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub gift_id: GiftId,
    /// `None` for anonymous visitors.
    pub reserved_by: Option<UserId>,
    pub quantity: u32,
    pub reserved_until: DateTime<Utc>,
    pub status: ReservationStatus,
    /// The pending purchase opened together with the hold.
    pub transaction_id: TransactionId,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.reserved_until < now
    }
}

/// A crowdfunding campaign toward one gift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupGift {
    pub id: GroupGiftId,
    pub gift_id: GiftId,
    pub target_amount: Money,
    /// Sum of contributions whose transaction succeeded.
    pub current_amount: Money,
    pub min_contribution: Money,
    pub currency: Currency,
    pub status: GroupGiftStatus,
    pub expiry_date: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GroupGift {
    /// Amount still missing to reach the target, zero once reached.
    pub fn remaining(&self) -> Money {
        self.target_amount.saturating_gap(self.current_amount)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == GroupGiftStatus::Active
            && self.expiry_date < now
            && self.current_amount < self.target_amount
    }
}

/// One payment toward a campaign. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: ContributionId,
    pub group_gift_id: GroupGiftId,
    /// `None` for anonymous contributors.
    pub contributor: Option<UserId>,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a transaction pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionScope {
    Reservation {
        gift_id: GiftId,
        reservation_id: ReservationId,
    },
    Contribution {
        group_gift_id: GroupGiftId,
        contribution_id: ContributionId,
    },
    /// Linked to neither a gift nor a campaign, e.g. a plain donation to a list.
    Unscoped,
}

impl TransactionScope {
    pub fn kind_str(&self) -> &'static str {
        match self {
            TransactionScope::Reservation { .. } => "reservation",
            TransactionScope::Contribution { .. } => "contribution",
            TransactionScope::Unscoped => "unscoped",
        }
    }
}

/// A recorded payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub list_id: GiftListId,
    pub scope: TransactionScope,
    pub amount: Money,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub thanked: bool,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThankYouNote {
    pub id: ThankYouNoteId,
    pub transaction_id: TransactionId,
    pub author: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Set once the notification transport has delivered the note.
    pub sent: bool,
}

/// Any ledger row, as carried by a write batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "row", rename_all = "snake_case")]
pub enum Record {
    GiftList(GiftList),
    Gift(Gift),
    Reservation(Reservation),
    GroupGift(GroupGift),
    Contribution(Contribution),
    Transaction(Transaction),
    ThankYouNote(ThankYouNote),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::GiftList(_) => EntityKind::GiftList,
            Record::Gift(_) => EntityKind::Gift,
            Record::Reservation(_) => EntityKind::Reservation,
            Record::GroupGift(_) => EntityKind::GroupGift,
            Record::Contribution(_) => EntityKind::Contribution,
            Record::Transaction(_) => EntityKind::Transaction,
            Record::ThankYouNote(_) => EntityKind::ThankYouNote,
        }
    }

    /// Raw identifier of the row.
    pub fn id(&self) -> i64 {
        match self {
            Record::GiftList(r) => r.id.as_i64(),
            Record::Gift(r) => r.id.as_i64(),
            Record::Reservation(r) => r.id.as_i64(),
            Record::GroupGift(r) => r.id.as_i64(),
            Record::Contribution(r) => r.id.as_i64(),
            Record::Transaction(r) => r.id.as_i64(),
            Record::ThankYouNote(r) => r.id.as_i64(),
        }
    }
}

macro_rules! into_record {
    ($($variant:ident),+) => {
        $(
            impl From<$variant> for Record {
                fn from(row: $variant) -> Self {
                    Record::$variant(row)
                }
            }
        )+
    };
}

into_record!(GiftList, Gift, Reservation, GroupGift, Contribution, Transaction, ThankYouNote);

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn gift(stock: u32, sold: u32) -> Gift {
        Gift {
            id: GiftId::new(1),
            list_id: GiftListId::new(1),
            name: "Espresso machine".to_string(),
            price: Money::from_units(120),
            currency: Currency::new("EUR").unwrap(),
            stock,
            sold,
            is_group_gift: false,
        }
    }

    #[test]
    fn test_available_accounts_for_sold_and_held() {
        assert_eq!(gift(5, 1).available(2), 2);
        assert_eq!(gift(1, 1).available(0), 0);
        assert_eq!(gift(1, 0).available(3), 0);
    }

    #[test]
    fn test_list_open_rules() {
        let now = Utc::now();
        let mut list = GiftList {
            id: GiftListId::new(1),
            owner: UserId::new(1),
            title: "Wedding".to_string(),
            visibility: Visibility::Public,
            expires_at: None,
        };
        assert!(list.is_open(now));

        list.expires_at = Some(now - Duration::days(1));
        assert!(!list.is_open(now));

        list.expires_at = None;
        list.visibility = Visibility::Private;
        assert!(!list.is_open(now));
    }

    #[test]
    fn test_group_gift_remaining_and_overdue() {
        let now = Utc::now();
        let mut campaign = GroupGift {
            id: GroupGiftId::new(1),
            gift_id: GiftId::new(1),
            target_amount: Money::from_units(100),
            current_amount: Money::from_units(90),
            min_contribution: Money::from_units(10),
            currency: Currency::new("EUR").unwrap(),
            status: GroupGiftStatus::Active,
            expiry_date: now - Duration::hours(1),
            completed_at: None,
        };
        assert_eq!(campaign.remaining(), Money::from_units(10));
        assert!(campaign.is_overdue(now));

        campaign.current_amount = Money::from_units(100);
        assert_eq!(campaign.remaining(), Money::ZERO);
        assert!(!campaign.is_overdue(now));
    }

    #[test]
    fn test_record_kind_and_id() {
        let record = Record::from(gift(1, 0));
        assert_eq!(record.kind(), EntityKind::Gift);
        assert_eq!(record.id(), 1);
    }

    #[test]
    fn test_scope_serialization_is_tagged() {
        let scope = TransactionScope::Reservation {
            gift_id: GiftId::new(3),
            reservation_id: ReservationId::new(4),
        };
        let json = serde_json::to_value(scope).unwrap();
        assert_eq!(json["kind"], "reservation");
        assert_eq!(json["reservation_id"], 4);
    }
}
