use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    ContributionId, GiftId, GiftListId, GroupGiftId, ReservationId, ThankYouNoteId,
    TransactionId,
};

use crate::{
    Contribution, EntityKind, Gift, GiftList, GroupGift, Record, Reservation, Result,
    ThankYouNote, Transaction, Version, Versioned,
};

/// A single row write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Creates a row. Fails if the id is taken.
    Insert(Record),
    /// Replaces a row, provided it is still at `expected`.
    Update { record: Record, expected: Version },
}

impl Write {
    pub fn record(&self) -> &Record {
        match self {
            Write::Insert(record) | Write::Update { record, .. } => record,
        }
    }
}

/// A set of writes committed atomically: either every write applies or none.
///
/// Updates carry the version observed at read time. A row that moved on in
/// the meantime rejects the batch with `ConcurrencyConflict`, so callers
/// re-read, recompute and try again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages the creation of a new row.
    pub fn insert(&mut self, record: impl Into<Record>) -> &mut Self {
        self.writes.push(Write::Insert(record.into()));
        self
    }

    /// Stages a compare-and-update of an existing row.
    pub fn update(&mut self, record: impl Into<Record>, expected: Version) -> &mut Self {
        self.writes.push(Write::Update {
            record: record.into(),
            expected,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Durable record of gifts, reservations, campaigns, contributions and
/// transactions.
///
/// Reads return rows with the version they were observed at. The only way to
/// change a row is `commit`, which applies a `WriteBatch` atomically with a
/// per-row version check. All implementations must be thread-safe.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Reserves a fresh identifier for a row of the given kind.
    async fn allocate_id(&self, kind: EntityKind) -> Result<i64>;

    /// Applies all writes of the batch or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    async fn gift_list(&self, id: GiftListId) -> Result<Option<Versioned<GiftList>>>;

    async fn gift(&self, id: GiftId) -> Result<Option<Versioned<Gift>>>;

    async fn reservation(&self, id: ReservationId) -> Result<Option<Versioned<Reservation>>>;

    async fn group_gift(&self, id: GroupGiftId) -> Result<Option<Versioned<GroupGift>>>;

    /// The campaign attached to a gift, if any.
    async fn group_gift_for_gift(&self, gift_id: GiftId)
    -> Result<Option<Versioned<GroupGift>>>;

    async fn contribution(&self, id: ContributionId) -> Result<Option<Versioned<Contribution>>>;

    async fn transaction(&self, id: TransactionId) -> Result<Option<Versioned<Transaction>>>;

    async fn thank_you_note(&self, id: ThankYouNoteId) -> Result<Option<Versioned<ThankYouNote>>>;

    /// Reservations of the gift currently holding stock.
    async fn active_reservations_for_gift(
        &self,
        gift_id: GiftId,
    ) -> Result<Vec<Versioned<Reservation>>>;

    /// Active reservations whose deadline lies before `now`, oldest id first.
    async fn reservations_due_for_expiry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Versioned<Reservation>>>;

    /// Active campaigns past their expiry date and still below target.
    async fn group_gifts_due_for_expiry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Versioned<GroupGift>>>;

    async fn contributions_for_group_gift(
        &self,
        group_gift_id: GroupGiftId,
    ) -> Result<Vec<Versioned<Contribution>>>;

    async fn transactions_for_list(&self, list_id: GiftListId)
    -> Result<Vec<Versioned<Transaction>>>;
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Units of the gift covered by active reservations still within their
    /// deadline at `now`.
    async fn held_units(&self, gift_id: GiftId, now: DateTime<Utc>) -> Result<u32> {
        Ok(self
            .active_reservations_for_gift(gift_id)
            .await?
            .iter()
            .filter(|r| !r.is_overdue(now))
            .map(|r| r.quantity)
            .sum())
    }

    /// Commits a batch holding a single insert.
    async fn insert_one(&self, record: Record) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.insert(record);
        self.commit(batch).await
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}

/// Error returned when a batch is malformed before reaching storage.
#[derive(Debug, Clone)]
pub struct BatchValidationError {
    pub message: String,
}

impl std::fmt::Display for BatchValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Batch validation error: {}", self.message)
    }
}

impl std::error::Error for BatchValidationError {}

/// Validates a batch before committing.
///
/// A batch may not be empty and may touch each row at most once; staging two
/// writes for the same row would make the second version check meaningless.
pub fn validate_batch(batch: &WriteBatch) -> std::result::Result<(), BatchValidationError> {
    if batch.is_empty() {
        return Err(BatchValidationError {
            message: "Cannot commit an empty batch".to_string(),
        });
    }

    let mut seen = std::collections::HashSet::with_capacity(batch.len());
    for write in batch.writes() {
        let record = write.record();
        if !seen.insert((record.kind(), record.id())) {
            return Err(BatchValidationError {
                message: format!("{} {} is written twice", record.kind(), record.id()),
            });
        }
    }

    Ok(())
}
