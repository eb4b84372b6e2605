//! Transaction ledger: payment records and their single terminal transition.

use chrono::{DateTime, Utc};
use common::{GiftListId, ThankYouNoteId, TransactionId, UserId};
use ledger_store::{
    Currency, EntityKind, LedgerStore, Money, Outcome, ThankYouNote, Transaction,
    TransactionScope, TransactionStatus, Versioned, WriteBatch,
};

use crate::context::{EngineContext, found};
use crate::error::{RegistryError, Result};
use crate::notify::NotificationKind;

/// A new `pending` transaction.
pub(crate) fn pending(
    id: TransactionId,
    list_id: GiftListId,
    scope: TransactionScope,
    amount: Money,
    currency: Currency,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction {
        id,
        list_id,
        scope,
        amount,
        currency,
        status: TransactionStatus::Pending,
        thanked: false,
        created_at: now,
        settled_at: None,
    }
}

/// The transaction after its terminal transition, or `AlreadyTerminal`.
pub(crate) fn settled(
    transaction: &Transaction,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    let next = outcome.as_status();
    if !transaction.status.can_transition_to(next) {
        return Err(RegistryError::AlreadyTerminal {
            entity: EntityKind::Transaction,
            id: transaction.id.as_i64(),
            status: transaction.status.as_str(),
        });
    }

    Ok(Transaction {
        status: next,
        settled_at: Some(now),
        ..transaction.clone()
    })
}

pub(crate) fn settled_kind(outcome: Outcome) -> NotificationKind {
    match outcome {
        Outcome::Succeeded => NotificationKind::TransactionSucceeded,
        Outcome::Failed => NotificationKind::TransactionFailed,
    }
}

pub(crate) fn record_settlement(outcome: Outcome) {
    metrics::counter!("transactions_settled_total", "outcome" => outcome.as_str()).increment(1);
}

/// Records payment attempts and guards their status.
///
/// Reservation and contribution transactions are owned by their managers,
/// which settle them together with the rows they affect. The ledger settles
/// unscoped transactions and transactions left behind by reservations that
/// expired or were cancelled while payment was pending.
#[derive(Clone)]
pub struct TransactionLedger<S> {
    ctx: EngineContext<S>,
}

impl<S: LedgerStore> TransactionLedger<S> {
    pub fn new(ctx: EngineContext<S>) -> Self {
        Self { ctx }
    }

    /// Opens a `pending` transaction.
    #[tracing::instrument(skip(self))]
    pub async fn open(
        &self,
        list_id: GiftListId,
        scope: TransactionScope,
        amount: Money,
        currency: Currency,
    ) -> Result<Transaction> {
        if amount.is_negative() {
            return Err(RegistryError::InvalidAmount { amount });
        }
        found(
            self.ctx.store().gift_list(list_id).await?,
            EntityKind::GiftList,
            list_id,
        )?;

        let id: TransactionId = self.ctx.next_id(EntityKind::Transaction).await?;
        let transaction = pending(id, list_id, scope, amount, currency, self.ctx.now());

        let mut batch = WriteBatch::new();
        batch.insert(transaction.clone());
        self.ctx.store().commit(batch).await?;

        tracing::info!(transaction_id = %id, scope = scope.kind_str(), "transaction opened");
        Ok(transaction)
    }

    /// Moves a transaction to its terminal status.
    ///
    /// Fails with `AlreadyTerminal` on a second call and with
    /// `ManagedTransaction` when a manager still owns the transaction.
    #[tracing::instrument(skip(self))]
    pub async fn settle(&self, transaction_id: TransactionId, outcome: Outcome) -> Result<Transaction> {
        let transaction = self
            .ctx
            .retry()
            .run("transaction_settle", |_| self.try_settle(transaction_id, outcome))
            .await?;

        record_settlement(outcome);
        tracing::info!(%transaction_id, outcome = outcome.as_str(), "transaction settled");
        self.ctx
            .notify(settled_kind(outcome), transaction_id)
            .await;
        Ok(transaction)
    }

    async fn try_settle(&self, transaction_id: TransactionId, outcome: Outcome) -> Result<Transaction> {
        let current = self.load(transaction_id).await?;
        let next = settled(&current, outcome, self.ctx.now())?;

        match current.scope {
            TransactionScope::Unscoped => {}
            TransactionScope::Reservation { reservation_id, .. } => {
                let reservation = found(
                    self.ctx.store().reservation(reservation_id).await?,
                    EntityKind::Reservation,
                    reservation_id,
                )?;
                if !reservation.status.is_terminal() {
                    return Err(RegistryError::ManagedTransaction {
                        transaction_id,
                        scope: current.scope.kind_str(),
                    });
                }
            }
            TransactionScope::Contribution { .. } => {
                return Err(RegistryError::ManagedTransaction {
                    transaction_id,
                    scope: current.scope.kind_str(),
                });
            }
        }

        let mut batch = WriteBatch::new();
        batch.update(next.clone(), current.version);
        self.ctx.store().commit(batch).await?;
        Ok(next)
    }

    /// Sets the `thanked` flag. Idempotent and independent of status.
    #[tracing::instrument(skip(self))]
    pub async fn mark_thanked(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.ctx
            .retry()
            .run("transaction_mark_thanked", |_| async move {
                let current = self.load(transaction_id).await?;
                if current.thanked {
                    return Ok(current.record);
                }

                let next = Transaction {
                    thanked: true,
                    ..current.record.clone()
                };
                let mut batch = WriteBatch::new();
                batch.update(next.clone(), current.version);
                self.ctx.store().commit(batch).await?;
                Ok(next)
            })
            .await
    }

    /// Records a thank-you note for a succeeded transaction and flags the
    /// transaction as thanked in the same commit.
    ///
    /// Only the owner of the list the transaction belongs to may write one.
    #[tracing::instrument(skip(self, message))]
    pub async fn write_thank_you_note(
        &self,
        transaction_id: TransactionId,
        author: UserId,
        message: &str,
    ) -> Result<ThankYouNote> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RegistryError::Validation(
                "thank-you message must not be empty".to_string(),
            ));
        }

        let note_id: ThankYouNoteId = self.ctx.next_id(EntityKind::ThankYouNote).await?;
        let note = self
            .ctx
            .retry()
            .run("thank_you_note", |_| {
                self.try_write_note(note_id, transaction_id, author, message)
            })
            .await?;

        tracing::info!(%note_id, %transaction_id, "thank-you note created");
        self.ctx
            .notify(NotificationKind::ThankYouNoteCreated, note_id)
            .await;
        Ok(note)
    }

    async fn try_write_note(
        &self,
        note_id: ThankYouNoteId,
        transaction_id: TransactionId,
        author: UserId,
        message: &str,
    ) -> Result<ThankYouNote> {
        let transaction = self.load(transaction_id).await?;
        if transaction.status != TransactionStatus::Succeeded {
            return Err(RegistryError::NotSettled {
                transaction_id,
                status: transaction.status,
            });
        }

        let list = found(
            self.ctx.store().gift_list(transaction.list_id).await?,
            EntityKind::GiftList,
            transaction.list_id,
        )?;
        if list.owner != author {
            return Err(RegistryError::NotOwner {
                entity: EntityKind::Transaction,
                id: transaction_id.as_i64(),
                actor: author,
            });
        }

        let note = ThankYouNote {
            id: note_id,
            transaction_id,
            author,
            message: message.to_string(),
            created_at: self.ctx.now(),
            sent: false,
        };

        let mut batch = WriteBatch::new();
        batch.insert(note.clone());
        if !transaction.thanked {
            let thanked = Transaction {
                thanked: true,
                ..transaction.record.clone()
            };
            batch.update(thanked, transaction.version);
        }
        self.ctx.store().commit(batch).await?;
        Ok(note)
    }

    /// Marks a note as delivered. Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn mark_note_sent(&self, note_id: ThankYouNoteId) -> Result<ThankYouNote> {
        self.ctx
            .retry()
            .run("thank_you_note_sent", |_| async move {
                let current = found(
                    self.ctx.store().thank_you_note(note_id).await?,
                    EntityKind::ThankYouNote,
                    note_id,
                )?;
                if current.sent {
                    return Ok(current.record);
                }

                let next = ThankYouNote {
                    sent: true,
                    ..current.record.clone()
                };
                let mut batch = WriteBatch::new();
                batch.update(next.clone(), current.version);
                self.ctx.store().commit(batch).await?;
                Ok(next)
            })
            .await
    }

    pub async fn get(&self, transaction_id: TransactionId) -> Result<Transaction> {
        Ok(self.load(transaction_id).await?.record)
    }

    pub async fn transactions_for_list(&self, list_id: GiftListId) -> Result<Vec<Transaction>> {
        Ok(self
            .ctx
            .store()
            .transactions_for_list(list_id)
            .await?
            .into_iter()
            .map(|t| t.record)
            .collect())
    }

    async fn load(&self, transaction_id: TransactionId) -> Result<Versioned<Transaction>> {
        found(
            self.ctx.store().transaction(transaction_id).await?,
            EntityKind::Transaction,
            transaction_id,
        )
    }
}
