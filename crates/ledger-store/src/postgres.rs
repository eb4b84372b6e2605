use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    ContributionId, GiftId, GiftListId, GroupGiftId, ReservationId, ThankYouNoteId,
    TransactionId, UserId,
};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};

use crate::{
    Contribution, Currency, EntityKind, Gift, GiftList, GroupGift, LedgerError, Money, Record,
    Reservation, Result, ThankYouNote, Transaction, TransactionScope, Version, Versioned,
    store::{LedgerStore, Write, WriteBatch, validate_batch},
};

type PgTransaction<'c> = sqlx::Transaction<'c, Postgres>;

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::GiftList => "gift_lists",
        EntityKind::Gift => "gifts",
        EntityKind::Reservation => "reservations",
        EntityKind::GroupGift => "group_gifts",
        EntityKind::Contribution => "contributions",
        EntityKind::Transaction => "transactions",
        EntityKind::ThankYouNote => "thank_you_notes",
    }
}

/// PostgreSQL-backed ledger store implementation.
///
/// Each batch runs in one SQL transaction. Updates are issued as
/// `UPDATE … WHERE id = $1 AND version = $2`; when no row matches, the
/// transaction is rolled back and the conflict reported.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    async fn fetch_by_id<T>(
        &self,
        kind: EntityKind,
        id: i64,
        map: fn(&PgRow) -> Result<Versioned<T>>,
    ) -> Result<Option<Versioned<T>>> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", table(kind));
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map).transpose()
    }

    async fn insert(tx: &mut PgTransaction<'_>, record: &Record) -> Result<()> {
        let query = match record {
            Record::GiftList(l) => sqlx::query(
                r#"
                INSERT INTO gift_lists (id, version, owner_id, title, visibility, expires_at)
                VALUES ($1, 1, $2, $3, $4, $5)
                "#,
            )
            .bind(l.id.as_i64())
            .bind(l.owner.as_i64())
            .bind(&l.title)
            .bind(l.visibility.as_str())
            .bind(l.expires_at),
            Record::Gift(g) => sqlx::query(
                r#"
                INSERT INTO gifts (id, version, list_id, name, price_cents, currency, stock, sold, is_group_gift)
                VALUES ($1, 1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(g.id.as_i64())
            .bind(g.list_id.as_i64())
            .bind(&g.name)
            .bind(g.price.cents())
            .bind(g.currency.as_str())
            .bind(i64::from(g.stock))
            .bind(i64::from(g.sold))
            .bind(g.is_group_gift),
            Record::Reservation(r) => sqlx::query(
                r#"
                INSERT INTO reservations (id, version, gift_id, reserved_by, quantity, reserved_until, status, transaction_id, created_at)
                VALUES ($1, 1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(r.id.as_i64())
            .bind(r.gift_id.as_i64())
            .bind(r.reserved_by.map(|u| u.as_i64()))
            .bind(i64::from(r.quantity))
            .bind(r.reserved_until)
            .bind(r.status.as_str())
            .bind(r.transaction_id.as_i64())
            .bind(r.created_at),
            Record::GroupGift(g) => sqlx::query(
                r#"
                INSERT INTO group_gifts (id, version, gift_id, target_cents, current_cents, min_contribution_cents, currency, status, expiry_date, completed_at)
                VALUES ($1, 1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(g.id.as_i64())
            .bind(g.gift_id.as_i64())
            .bind(g.target_amount.cents())
            .bind(g.current_amount.cents())
            .bind(g.min_contribution.cents())
            .bind(g.currency.as_str())
            .bind(g.status.as_str())
            .bind(g.expiry_date)
            .bind(g.completed_at),
            Record::Contribution(c) => sqlx::query(
                r#"
                INSERT INTO contributions (id, version, group_gift_id, contributor_id, transaction_id, amount_cents, message, created_at)
                VALUES ($1, 1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(c.id.as_i64())
            .bind(c.group_gift_id.as_i64())
            .bind(c.contributor.map(|u| u.as_i64()))
            .bind(c.transaction_id.as_i64())
            .bind(c.amount.cents())
            .bind(&c.message)
            .bind(c.created_at),
            Record::Transaction(t) => {
                let (gift_id, reservation_id, group_gift_id, contribution_id) = scope_columns(&t.scope);
                sqlx::query(
                    r#"
                    INSERT INTO transactions (id, version, list_id, scope_kind, gift_id, reservation_id, group_gift_id, contribution_id, amount_cents, currency, status, thanked, created_at, settled_at)
                    VALUES ($1, 1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(t.id.as_i64())
                .bind(t.list_id.as_i64())
                .bind(t.scope.kind_str())
                .bind(gift_id)
                .bind(reservation_id)
                .bind(group_gift_id)
                .bind(contribution_id)
                .bind(t.amount.cents())
                .bind(t.currency.as_str())
                .bind(t.status.as_str())
                .bind(t.thanked)
                .bind(t.created_at)
                .bind(t.settled_at)
            }
            Record::ThankYouNote(n) => sqlx::query(
                r#"
                INSERT INTO thank_you_notes (id, version, transaction_id, author_id, message, created_at, sent)
                VALUES ($1, 1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(n.id.as_i64())
            .bind(n.transaction_id.as_i64())
            .bind(n.author.as_i64())
            .bind(&n.message)
            .bind(n.created_at)
            .bind(n.sent),
        };

        query.execute(&mut **tx).await.map_err(|e| {
            // Primary key or one-campaign-per-gift violation
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return LedgerError::DuplicateKey {
                    entity: record.kind(),
                    id: record.id(),
                };
            }
            LedgerError::Database(e)
        })?;

        Ok(())
    }

    async fn update(tx: &mut PgTransaction<'_>, record: &Record, expected: Version) -> Result<()> {
        let query = match record {
            Record::GiftList(l) => sqlx::query(
                r#"
                UPDATE gift_lists SET version = version + 1, owner_id = $3, title = $4, visibility = $5, expires_at = $6
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(l.id.as_i64())
            .bind(expected.as_i64())
            .bind(l.owner.as_i64())
            .bind(&l.title)
            .bind(l.visibility.as_str())
            .bind(l.expires_at),
            Record::Gift(g) => sqlx::query(
                r#"
                UPDATE gifts SET version = version + 1, name = $3, price_cents = $4, currency = $5, stock = $6, sold = $7, is_group_gift = $8
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(g.id.as_i64())
            .bind(expected.as_i64())
            .bind(&g.name)
            .bind(g.price.cents())
            .bind(g.currency.as_str())
            .bind(i64::from(g.stock))
            .bind(i64::from(g.sold))
            .bind(g.is_group_gift),
            Record::Reservation(r) => sqlx::query(
                r#"
                UPDATE reservations SET version = version + 1, quantity = $3, reserved_until = $4, status = $5
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(r.id.as_i64())
            .bind(expected.as_i64())
            .bind(i64::from(r.quantity))
            .bind(r.reserved_until)
            .bind(r.status.as_str()),
            Record::GroupGift(g) => sqlx::query(
                r#"
                UPDATE group_gifts SET version = version + 1, current_cents = $3, status = $4, expiry_date = $5, completed_at = $6
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(g.id.as_i64())
            .bind(expected.as_i64())
            .bind(g.current_amount.cents())
            .bind(g.status.as_str())
            .bind(g.expiry_date)
            .bind(g.completed_at),
            Record::Contribution(c) => sqlx::query(
                r#"
                UPDATE contributions SET version = version + 1, message = $3
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(c.id.as_i64())
            .bind(expected.as_i64())
            .bind(&c.message),
            Record::Transaction(t) => sqlx::query(
                r#"
                UPDATE transactions SET version = version + 1, status = $3, thanked = $4, settled_at = $5
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(t.id.as_i64())
            .bind(expected.as_i64())
            .bind(t.status.as_str())
            .bind(t.thanked)
            .bind(t.settled_at),
            Record::ThankYouNote(n) => sqlx::query(
                r#"
                UPDATE thank_you_notes SET version = version + 1, message = $3, sent = $4
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(n.id.as_i64())
            .bind(expected.as_i64())
            .bind(&n.message)
            .bind(n.sent),
        };

        let affected = query.execute(&mut **tx).await?.rows_affected();
        if affected == 1 {
            return Ok(());
        }

        let entity = record.kind();
        let id = record.id();
        let sql = format!("SELECT version FROM {} WHERE id = $1", table(entity));
        let actual: Option<i64> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

        match actual {
            Some(actual) => Err(LedgerError::ConcurrencyConflict {
                entity,
                id,
                expected,
                actual: Version::new(actual),
            }),
            None => Err(LedgerError::NotFound { entity, id }),
        }
    }
}

fn scope_columns(scope: &TransactionScope) -> (Option<i64>, Option<i64>, Option<i64>, Option<i64>) {
    match scope {
        TransactionScope::Reservation {
            gift_id,
            reservation_id,
        } => (Some(gift_id.as_i64()), Some(reservation_id.as_i64()), None, None),
        TransactionScope::Contribution {
            group_gift_id,
            contribution_id,
        } => (None, None, Some(group_gift_id.as_i64()), Some(contribution_id.as_i64())),
        TransactionScope::Unscoped => (None, None, None, None),
    }
}

fn version(row: &PgRow) -> Result<Version> {
    Ok(Version::new(row.try_get("version")?))
}

fn count(row: &PgRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value)
        .map_err(|_| LedgerError::InvalidData(format!("{column} out of range: {value}")))
}

fn money(row: &PgRow, column: &str) -> Result<Money> {
    Ok(Money::from_cents(row.try_get(column)?))
}

fn currency(row: &PgRow) -> Result<Currency> {
    Currency::new(row.try_get::<String, _>("currency")?)
}

fn parsed<T: std::str::FromStr<Err = LedgerError>>(row: &PgRow, column: &str) -> Result<T> {
    row.try_get::<String, _>(column)?.parse()
}

fn required(row: &PgRow, column: &str) -> Result<i64> {
    row.try_get::<Option<i64>, _>(column)?
        .ok_or_else(|| LedgerError::InvalidData(format!("transaction scope is missing {column}")))
}

fn row_to_gift_list(row: &PgRow) -> Result<Versioned<GiftList>> {
    let list = GiftList {
        id: GiftListId::new(row.try_get("id")?),
        owner: UserId::new(row.try_get("owner_id")?),
        title: row.try_get("title")?,
        visibility: parsed(row, "visibility")?,
        expires_at: row.try_get("expires_at")?,
    };
    Ok(Versioned::new(list, version(row)?))
}

fn row_to_gift(row: &PgRow) -> Result<Versioned<Gift>> {
    let gift = Gift {
        id: GiftId::new(row.try_get("id")?),
        list_id: GiftListId::new(row.try_get("list_id")?),
        name: row.try_get("name")?,
        price: money(row, "price_cents")?,
        currency: currency(row)?,
        stock: count(row, "stock")?,
        sold: count(row, "sold")?,
        is_group_gift: row.try_get("is_group_gift")?,
    };
    Ok(Versioned::new(gift, version(row)?))
}

fn row_to_reservation(row: &PgRow) -> Result<Versioned<Reservation>> {
    let reservation = Reservation {
        id: ReservationId::new(row.try_get("id")?),
        gift_id: GiftId::new(row.try_get("gift_id")?),
        reserved_by: row.try_get::<Option<i64>, _>("reserved_by")?.map(UserId::new),
        quantity: count(row, "quantity")?,
        reserved_until: row.try_get("reserved_until")?,
        status: parsed(row, "status")?,
        transaction_id: TransactionId::new(row.try_get("transaction_id")?),
        created_at: row.try_get("created_at")?,
    };
    Ok(Versioned::new(reservation, version(row)?))
}

fn row_to_group_gift(row: &PgRow) -> Result<Versioned<GroupGift>> {
    let campaign = GroupGift {
        id: GroupGiftId::new(row.try_get("id")?),
        gift_id: GiftId::new(row.try_get("gift_id")?),
        target_amount: money(row, "target_cents")?,
        current_amount: money(row, "current_cents")?,
        min_contribution: money(row, "min_contribution_cents")?,
        currency: currency(row)?,
        status: parsed(row, "status")?,
        expiry_date: row.try_get("expiry_date")?,
        completed_at: row.try_get("completed_at")?,
    };
    Ok(Versioned::new(campaign, version(row)?))
}

fn row_to_contribution(row: &PgRow) -> Result<Versioned<Contribution>> {
    let contribution = Contribution {
        id: ContributionId::new(row.try_get("id")?),
        group_gift_id: GroupGiftId::new(row.try_get("group_gift_id")?),
        contributor: row.try_get::<Option<i64>, _>("contributor_id")?.map(UserId::new),
        transaction_id: TransactionId::new(row.try_get("transaction_id")?),
        amount: money(row, "amount_cents")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    };
    Ok(Versioned::new(contribution, version(row)?))
}

fn row_to_transaction(row: &PgRow) -> Result<Versioned<Transaction>> {
    let scope_kind: String = row.try_get("scope_kind")?;
    let scope = match scope_kind.as_str() {
        "reservation" => TransactionScope::Reservation {
            gift_id: GiftId::new(required(row, "gift_id")?),
            reservation_id: ReservationId::new(required(row, "reservation_id")?),
        },
        "contribution" => TransactionScope::Contribution {
            group_gift_id: GroupGiftId::new(required(row, "group_gift_id")?),
            contribution_id: ContributionId::new(required(row, "contribution_id")?),
        },
        "unscoped" => TransactionScope::Unscoped,
        other => {
            return Err(LedgerError::InvalidData(format!(
                "unknown transaction scope: {other:?}"
            )));
        }
    };

    let transaction = Transaction {
        id: TransactionId::new(row.try_get("id")?),
        list_id: GiftListId::new(row.try_get("list_id")?),
        scope,
        amount: money(row, "amount_cents")?,
        currency: currency(row)?,
        status: parsed(row, "status")?,
        thanked: row.try_get("thanked")?,
        created_at: row.try_get("created_at")?,
        settled_at: row.try_get("settled_at")?,
    };
    Ok(Versioned::new(transaction, version(row)?))
}

fn row_to_thank_you_note(row: &PgRow) -> Result<Versioned<ThankYouNote>> {
    let note = ThankYouNote {
        id: ThankYouNoteId::new(row.try_get("id")?),
        transaction_id: TransactionId::new(row.try_get("transaction_id")?),
        author: UserId::new(row.try_get("author_id")?),
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        sent: row.try_get("sent")?,
    };
    Ok(Versioned::new(note, version(row)?))
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn allocate_id(&self, kind: EntityKind) -> Result<i64> {
        let id: i64 = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence($1, 'id'))")
            .bind(table(kind))
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    #[tracing::instrument(skip(self, batch), fields(writes = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        validate_batch(&batch).map_err(|e| LedgerError::InvalidData(e.message))?;

        // Rolled back on drop if any write fails
        let mut tx = self.pool.begin().await?;

        for write in batch.writes() {
            match write {
                Write::Insert(record) => Self::insert(&mut tx, record).await?,
                Write::Update { record, expected } => {
                    Self::update(&mut tx, record, *expected).await?
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn gift_list(&self, id: GiftListId) -> Result<Option<Versioned<GiftList>>> {
        self.fetch_by_id(EntityKind::GiftList, id.as_i64(), row_to_gift_list)
            .await
    }

    async fn gift(&self, id: GiftId) -> Result<Option<Versioned<Gift>>> {
        self.fetch_by_id(EntityKind::Gift, id.as_i64(), row_to_gift)
            .await
    }

    async fn reservation(&self, id: ReservationId) -> Result<Option<Versioned<Reservation>>> {
        self.fetch_by_id(EntityKind::Reservation, id.as_i64(), row_to_reservation)
            .await
    }

    async fn group_gift(&self, id: GroupGiftId) -> Result<Option<Versioned<GroupGift>>> {
        self.fetch_by_id(EntityKind::GroupGift, id.as_i64(), row_to_group_gift)
            .await
    }

    async fn group_gift_for_gift(
        &self,
        gift_id: GiftId,
    ) -> Result<Option<Versioned<GroupGift>>> {
        let row = sqlx::query("SELECT * FROM group_gifts WHERE gift_id = $1")
            .bind(gift_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_group_gift).transpose()
    }

    async fn contribution(&self, id: ContributionId) -> Result<Option<Versioned<Contribution>>> {
        self.fetch_by_id(EntityKind::Contribution, id.as_i64(), row_to_contribution)
            .await
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Versioned<Transaction>>> {
        self.fetch_by_id(EntityKind::Transaction, id.as_i64(), row_to_transaction)
            .await
    }

    async fn thank_you_note(&self, id: ThankYouNoteId) -> Result<Option<Versioned<ThankYouNote>>> {
        self.fetch_by_id(EntityKind::ThankYouNote, id.as_i64(), row_to_thank_you_note)
            .await
    }

    async fn active_reservations_for_gift(
        &self,
        gift_id: GiftId,
    ) -> Result<Vec<Versioned<Reservation>>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM reservations
            WHERE gift_id = $1 AND status = 'active'
            ORDER BY id ASC
            "#,
        )
        .bind(gift_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_reservation).collect()
    }

    async fn reservations_due_for_expiry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Versioned<Reservation>>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM reservations
            WHERE status = 'active' AND reserved_until < $1
            ORDER BY id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_reservation).collect()
    }

    async fn group_gifts_due_for_expiry(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Versioned<GroupGift>>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM group_gifts
            WHERE status = 'active' AND expiry_date < $1 AND current_cents < target_cents
            ORDER BY id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_group_gift).collect()
    }

    async fn contributions_for_group_gift(
        &self,
        group_gift_id: GroupGiftId,
    ) -> Result<Vec<Versioned<Contribution>>> {
        let rows = sqlx::query(
            "SELECT * FROM contributions WHERE group_gift_id = $1 ORDER BY id ASC",
        )
        .bind(group_gift_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_contribution).collect()
    }

    async fn transactions_for_list(
        &self,
        list_id: GiftListId,
    ) -> Result<Vec<Versioned<Transaction>>> {
        let rows = sqlx::query("SELECT * FROM transactions WHERE list_id = $1 ORDER BY id ASC")
            .bind(list_id.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_transaction).collect()
    }
}
