use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    ContributionId, GiftId, GiftListId, GroupGiftId, ReservationId, ThankYouNoteId,
    TransactionId,
};
use tokio::sync::RwLock;

use crate::{
    Contribution, EntityKind, Gift, GiftList, GroupGift, LedgerError, Record, Reservation,
    Result, ThankYouNote, Transaction, Version, Versioned,
    store::{LedgerStore, Write, WriteBatch, validate_batch},
};

type RowKey = (EntityKind, i64);

#[derive(Debug, Default)]
struct Tables {
    rows: BTreeMap<RowKey, Versioned<Record>>,
    sequences: HashMap<EntityKind, i64>,
}

impl Tables {
    fn get<T: Clone>(&self, key: RowKey, pick: fn(&Record) -> Option<&T>) -> Option<Versioned<T>> {
        self.rows.get(&key).and_then(|row| {
            pick(&row.record).map(|record| Versioned::new(record.clone(), row.version))
        })
    }

    fn scan<T: Clone>(
        &self,
        kind: EntityKind,
        pick: fn(&Record) -> Option<&T>,
        keep: impl Fn(&T) -> bool,
    ) -> Vec<Versioned<T>> {
        self.rows
            .range((kind, i64::MIN)..=(kind, i64::MAX))
            .filter_map(|(_, row)| {
                pick(&row.record)
                    .filter(|record| keep(record))
                    .map(|record| Versioned::new(record.clone(), row.version))
            })
            .collect()
    }
}

fn as_gift_list(r: &Record) -> Option<&GiftList> {
    match r {
        Record::GiftList(v) => Some(v),
        _ => None,
    }
}

fn as_gift(r: &Record) -> Option<&Gift> {
    match r {
        Record::Gift(v) => Some(v),
        _ => None,
    }
}

fn as_reservation(r: &Record) -> Option<&Reservation> {
    match r {
        Record::Reservation(v) => Some(v),
        _ => None,
    }
}

fn as_group_gift(r: &Record) -> Option<&GroupGift> {
    match r {
        Record::GroupGift(v) => Some(v),
        _ => None,
    }
}

fn as_contribution(r: &Record) -> Option<&Contribution> {
    match r {
        Record::Contribution(v) => Some(v),
        _ => None,
    }
}

fn as_transaction(r: &Record) -> Option<&Transaction> {
    match r {
        Record::Transaction(v) => Some(v),
        _ => None,
    }
}

fn as_thank_you_note(r: &Record) -> Option<&ThankYouNote> {
    match r {
        Record::ThankYouNote(v) => Some(v),
        _ => None,
    }
}

/// In-memory ledger store.
///
/// Offers the same atomic, version-checked commit semantics as the
/// PostgreSQL implementation. Clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of rows stored.
    pub async fn row_count(&self) -> usize {
        self.tables.read().await.rows.len()
    }

    /// Removes every row and resets id sequences.
    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        tables.rows.clear();
        tables.sequences.clear();
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn allocate_id(&self, kind: EntityKind) -> Result<i64> {
        let mut tables = self.tables.write().await;
        let next = tables.sequences.entry(kind).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        validate_batch(&batch).map_err(|e| LedgerError::InvalidData(e.message))?;

        let mut tables = self.tables.write().await;

        // Check every write before touching anything so the batch is all-or-nothing
        for write in batch.writes() {
            let record = write.record();
            let key = (record.kind(), record.id());
            match write {
                Write::Insert(_) => {
                    if tables.rows.contains_key(&key) {
                        return Err(LedgerError::DuplicateKey {
                            entity: key.0,
                            id: key.1,
                        });
                    }
                }
                Write::Update { expected, .. } => {
                    let actual = tables
                        .rows
                        .get(&key)
                        .map(|row| row.version)
                        .ok_or(LedgerError::NotFound {
                            entity: key.0,
                            id: key.1,
                        })?;
                    if actual != *expected {
                        return Err(LedgerError::ConcurrencyConflict {
                            entity: key.0,
                            id: key.1,
                            expected: *expected,
                            actual,
                        });
                    }
                }
            }
        }

        for write in batch.into_writes() {
            match write {
                Write::Insert(record) => {
                    let key = (record.kind(), record.id());
                    // Keep sequences ahead of explicitly chosen ids
                    let seq = tables.sequences.entry(key.0).or_insert(0);
                    *seq = (*seq).max(key.1);
                    tables
                        .rows
                        .insert(key, Versioned::new(record, Version::first()));
                }
                Write::Update { record, expected } => {
                    let key = (record.kind(), record.id());
                    tables
                        .rows
                        .insert(key, Versioned::new(record, expected.next()));
                }
            }
        }

        Ok(())
    }

    async fn gift_list(&self, id: GiftListId) -> Result<Option<Versioned<GiftList>>> {
        let tables = self.tables.read().await;
        Ok(tables.get((EntityKind::GiftList, id.as_i64()), as_gift_list))
    }

    async fn gift(&self, id: GiftId) -> Result<Option<Versioned<Gift>>> {
        let tables = self.tables.read().await;
        Ok(tables.get((EntityKind::Gift, id.as_i64()), as_gift))
    }

    async fn reservation(&self, id: ReservationId) -> Result<Option<Versioned<Reservation>>> {
        let tables = self.tables.read().await;
        Ok(tables.get((EntityKind::Reservation, id.as_i64()), as_reservation))
    }

    async fn group_gift(&self, id: GroupGiftId) -> Result<Option<Versioned<GroupGift>>> {
        let tables = self.tables.read().await;
        Ok(tables.get((EntityKind::GroupGift, id.as_i64()), as_group_gift))
    }

    async fn group_gift_for_gift(
        &self,
        gift_id: GiftId,
    ) -> Result<Option<Versioned<GroupGift>>> {
        let tables = self.tables.read().await;
        Ok(tables
            .scan(EntityKind::GroupGift, as_group_gift, |g| g.gift_id == gift_id)
            .into_iter()
            .next())
    }

    async fn contribution(&self, id: ContributionId) -> Result<Option<Versioned<Contribution>>> {
        let tables = self.tables.read().await;
        Ok(tables.get((EntityKind::Contribution, id.as_i64()), as_contribution))
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Versioned<Transaction>>> {
        let tables = self.tables.read().await;
        Ok(tables.get((EntityKind::Transaction, id.as_i64()), as_transaction))
    }

    async fn thank_you_note(&self, id: ThankYouNoteId) -> Result<Option<Versioned<ThankYouNote>>> {
        let tables = self.tables.read().await;
        Ok(tables.get((EntityKind::ThankYouNote, id.as_i64()), as_thank_you_note))
    }

    async fn active_reservations_for_gift(
        &self,
        gift_id: GiftId,
    ) -> Result<Vec<Versioned<Reservation>>> {
        let tables = self.tables.read().await;
        Ok(tables.scan(EntityKind::Reservation, as_reservation, |r| {
            r.gift_id == gift_id && r.status.holds_stock()
        }))
    }

    async fn reservations_due_for_expiry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Versioned<Reservation>>> {
        let tables = self.tables.read().await;
        Ok(tables.scan(EntityKind::Reservation, as_reservation, |r| {
            r.is_overdue(now)
        }))
    }

    async fn group_gifts_due_for_expiry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Versioned<GroupGift>>> {
        let tables = self.tables.read().await;
        Ok(tables.scan(EntityKind::GroupGift, as_group_gift, |g| g.is_overdue(now)))
    }

    async fn contributions_for_group_gift(
        &self,
        group_gift_id: GroupGiftId,
    ) -> Result<Vec<Versioned<Contribution>>> {
        let tables = self.tables.read().await;
        Ok(tables.scan(EntityKind::Contribution, as_contribution, |c| {
            c.group_gift_id == group_gift_id
        }))
    }

    async fn transactions_for_list(
        &self,
        list_id: GiftListId,
    ) -> Result<Vec<Versioned<Transaction>>> {
        let tables = self.tables.read().await;
        Ok(tables.scan(EntityKind::Transaction, as_transaction, |t| {
            t.list_id == list_id
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::UserId;

    use super::*;
    use crate::{Currency, LedgerStoreExt, Money, ReservationStatus, Visibility};

    fn test_list(id: i64) -> GiftList {
        GiftList {
            id: GiftListId::new(id),
            owner: UserId::new(1),
            title: "Housewarming".to_string(),
            visibility: Visibility::Public,
            expires_at: None,
        }
    }

    fn test_gift(id: i64, stock: u32) -> Gift {
        Gift {
            id: GiftId::new(id),
            list_id: GiftListId::new(1),
            name: "Kettle".to_string(),
            price: Money::from_units(40),
            currency: Currency::new("EUR").unwrap(),
            stock,
            sold: 0,
            is_group_gift: false,
        }
    }

    fn test_reservation(id: i64, gift: i64, quantity: u32, until: DateTime<Utc>) -> Reservation {
        Reservation {
            id: ReservationId::new(id),
            gift_id: GiftId::new(gift),
            reserved_by: Some(UserId::new(2)),
            quantity,
            reserved_until: until,
            status: ReservationStatus::Active,
            transaction_id: TransactionId::new(id),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_starts_at_first_version() {
        let store = InMemoryLedgerStore::new();
        store.insert_one(test_list(1).into()).await.unwrap();

        let list = store.gift_list(GiftListId::new(1)).await.unwrap().unwrap();
        assert_eq!(list.version, Version::first());
        assert_eq!(list.title, "Housewarming");
        assert_eq!(store.row_count().await, 1);
    }

    #[tokio::test]
    async fn update_with_current_version_bumps_it() {
        let store = InMemoryLedgerStore::new();
        store.insert_one(test_gift(1, 3).into()).await.unwrap();

        let mut gift = store.gift(GiftId::new(1)).await.unwrap().unwrap();
        gift.record.sold = 1;
        let mut batch = WriteBatch::new();
        batch.update(gift.record.clone(), gift.version);
        store.commit(batch).await.unwrap();

        let stored = store.gift(GiftId::new(1)).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::new(2));
        assert_eq!(stored.sold, 1);
    }

    #[tokio::test]
    async fn stale_update_is_a_conflict() {
        let store = InMemoryLedgerStore::new();
        store.insert_one(test_gift(1, 3).into()).await.unwrap();
        let stale = store.gift(GiftId::new(1)).await.unwrap().unwrap();

        let mut batch = WriteBatch::new();
        batch.update(stale.record.clone(), stale.version);
        store.commit(batch.clone()).await.unwrap();

        let result = store.commit(batch).await;
        assert!(matches!(
            result,
            Err(LedgerError::ConcurrencyConflict { entity: EntityKind::Gift, id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn failed_batch_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        store.insert_one(test_gift(1, 3).into()).await.unwrap();

        let mut batch = WriteBatch::new();
        batch
            .insert(test_reservation(1, 1, 1, Utc::now()))
            .update(test_gift(1, 3), Version::new(7));

        assert!(store.commit(batch).await.is_err());
        assert!(store.reservation(ReservationId::new(1)).await.unwrap().is_none());
        assert_eq!(store.row_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryLedgerStore::new();
        store.insert_one(test_list(1).into()).await.unwrap();
        let result = store.insert_one(test_list(1).into()).await;
        assert!(matches!(result, Err(LedgerError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn update_of_missing_row_is_not_found() {
        let store = InMemoryLedgerStore::new();
        let mut batch = WriteBatch::new();
        batch.update(test_list(9), Version::first());
        let result = store.commit(batch).await;
        assert!(matches!(result, Err(LedgerError::NotFound { id: 9, .. })));
    }

    #[tokio::test]
    async fn allocate_id_is_sequential_per_kind() {
        let store = InMemoryLedgerStore::new();
        assert_eq!(store.allocate_id(EntityKind::Gift).await.unwrap(), 1);
        assert_eq!(store.allocate_id(EntityKind::Gift).await.unwrap(), 2);
        assert_eq!(store.allocate_id(EntityKind::Reservation).await.unwrap(), 1);

        store.insert_one(test_list(10).into()).await.unwrap();
        assert_eq!(store.allocate_id(EntityKind::GiftList).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn held_units_and_expiry_scans() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        let mut batch = WriteBatch::new();
        batch
            .insert(test_gift(1, 5))
            .insert(test_reservation(1, 1, 2, now + Duration::minutes(10)))
            .insert(test_reservation(2, 1, 1, now - Duration::minutes(1)))
            .insert(test_reservation(3, 2, 4, now - Duration::minutes(1)));
        let mut cancelled = test_reservation(4, 1, 1, now - Duration::minutes(1));
        cancelled.status = ReservationStatus::Cancelled;
        batch.insert(cancelled);
        store.commit(batch).await.unwrap();

        assert_eq!(store.held_units(GiftId::new(1), now).await.unwrap(), 2);
        let earlier = now - Duration::minutes(5);
        assert_eq!(store.held_units(GiftId::new(1), earlier).await.unwrap(), 3);

        let due = store.reservations_due_for_expiry(now).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|r| r.id.as_i64()).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let store = InMemoryLedgerStore::new();
        store.insert_one(test_list(1).into()).await.unwrap();
        store.clear().await;
        assert_eq!(store.row_count().await, 0);
        assert_eq!(store.allocate_id(EntityKind::GiftList).await.unwrap(), 1);
    }
}
