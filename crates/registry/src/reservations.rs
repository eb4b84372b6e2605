//! Reservation manager: exclusive, time-bounded holds on gift units.

use chrono::{DateTime, Duration, Utc};
use common::{GiftId, ReservationId, TransactionId, UserId};
use ledger_store::{
    EntityKind, Gift, LedgerStore, Outcome, Reservation, ReservationStatus,
    Transaction, TransactionScope, Versioned, WriteBatch,
};
use serde::{Deserialize, Serialize};

use crate::context::{EngineContext, found};
use crate::error::{RegistryError, Result};
use crate::notify::NotificationKind;
use crate::transactions::{pending, record_settlement, settled, settled_kind};

/// Who is asking to change a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "user_id", rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    Admin(UserId),
}

impl Actor {
    pub fn user_id(&self) -> UserId {
        match self {
            Actor::User(id) | Actor::Admin(id) => *id,
        }
    }

    /// Whether the actor may release a hold taken by `reserved_by`.
    /// Anonymous holds can only be released by an admin.
    pub fn may_release(&self, reserved_by: Option<UserId>) -> bool {
        match self {
            Actor::Admin(_) => true,
            Actor::User(id) => reserved_by == Some(*id),
        }
    }
}

/// The hold and the pending purchase opened with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationReceipt {
    pub reservation: Reservation,
    pub transaction: Transaction,
}

/// Grants and releases holds on units of non-group gifts.
///
/// Every commit that creates a hold also rewrites the gift row at the version
/// it was read, so two reservations of the same gift can never both commit
/// against the same availability figure.
#[derive(Clone)]
pub struct ReservationManager<S> {
    ctx: EngineContext<S>,
}

impl<S: LedgerStore> ReservationManager<S> {
    pub fn new(ctx: EngineContext<S>) -> Self {
        Self { ctx }
    }

    /// Places an `active` hold of `quantity` units for `hold` and opens the
    /// `pending` transaction for the purchase.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        gift_id: GiftId,
        reserved_by: Option<UserId>,
        quantity: u32,
        hold: Duration,
    ) -> Result<ReservationReceipt> {
        let result = self.place_hold(gift_id, reserved_by, quantity, hold).await;

        match &result {
            Ok(receipt) => {
                metrics::counter!("reservations_created_total").increment(1);
                tracing::info!(
                    reservation_id = %receipt.reservation.id,
                    transaction_id = %receipt.transaction.id,
                    %gift_id,
                    quantity,
                    "reservation created"
                );
                self.ctx
                    .notify(NotificationKind::ReservationCreated, receipt.reservation.id)
                    .await;
            }
            Err(err) => {
                metrics::counter!("reservations_rejected_total", "reason" => err.code())
                    .increment(1);
            }
        }

        result
    }

    async fn place_hold(
        &self,
        gift_id: GiftId,
        reserved_by: Option<UserId>,
        quantity: u32,
        hold: Duration,
    ) -> Result<ReservationReceipt> {
        if quantity == 0 {
            return Err(RegistryError::InvalidQuantity { quantity });
        }
        if hold <= Duration::zero() {
            return Err(RegistryError::Validation(
                "hold duration must be positive".to_string(),
            ));
        }

        let reservation_id: ReservationId = self.ctx.next_id(EntityKind::Reservation).await?;
        let transaction_id: TransactionId = self.ctx.next_id(EntityKind::Transaction).await?;

        self.ctx
            .retry()
            .run("reserve", |_| {
                self.try_reserve(gift_id, reserved_by, quantity, hold, reservation_id, transaction_id)
            })
            .await
    }

    async fn try_reserve(
        &self,
        gift_id: GiftId,
        reserved_by: Option<UserId>,
        quantity: u32,
        hold: Duration,
        reservation_id: ReservationId,
        transaction_id: TransactionId,
    ) -> Result<ReservationReceipt> {
        let now = self.ctx.now();
        let gift = self.visible_gift(gift_id, now).await?;
        if gift.is_group_gift {
            return Err(RegistryError::NotReservable { gift_id });
        }

        let reserved_until = now.checked_add_signed(hold).ok_or_else(|| {
            RegistryError::Validation(format!("hold of {hold} runs past the supported range"))
        })?;
        let amount = gift
            .price
            .checked_mul(quantity)
            .ok_or(RegistryError::InvalidAmount { amount: gift.price })?;

        // Read after the gift: any hold committed since bumps its version.
        // Overdue holds are expired in the same batch instead of waiting for
        // the sweeper.
        let (overdue, live): (Vec<_>, Vec<_>) = self
            .ctx
            .store()
            .active_reservations_for_gift(gift_id)
            .await?
            .into_iter()
            .partition(|r| r.is_overdue(now));
        let held: u32 = live.iter().map(|r| r.quantity).sum();
        let available = gift.available(held);
        if available < quantity {
            return Err(RegistryError::InsufficientStock {
                gift_id,
                requested: quantity,
                available,
            });
        }

        let reservation = Reservation {
            id: reservation_id,
            gift_id,
            reserved_by,
            quantity,
            reserved_until,
            status: ReservationStatus::Active,
            transaction_id,
            created_at: now,
        };
        let transaction = pending(
            transaction_id,
            gift.list_id,
            TransactionScope::Reservation {
                gift_id,
                reservation_id,
            },
            amount,
            gift.currency.clone(),
            now,
        );

        let mut batch = WriteBatch::new();
        batch
            .insert(reservation.clone())
            .insert(transaction.clone())
            .update(gift.record.clone(), gift.version);
        for stale in &overdue {
            let expired = Reservation {
                status: ReservationStatus::Expired,
                ..stale.record.clone()
            };
            batch.update(expired, stale.version);
        }
        self.ctx.store().commit(batch).await?;

        if !overdue.is_empty() {
            metrics::counter!("reservations_expired_total").increment(overdue.len() as u64);
            tracing::info!(%gift_id, expired = overdue.len(), "overdue holds expired on reserve");
        }

        Ok(ReservationReceipt {
            reservation,
            transaction,
        })
    }

    /// Applies the payment outcome of an `active` reservation.
    ///
    /// On success the units are sold; on failure the hold is released at once.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, reservation_id: ReservationId, outcome: Outcome) -> Result<Reservation> {
        let (reservation, transaction) = self
            .ctx
            .retry()
            .run("confirm", |_| self.try_confirm(reservation_id, outcome))
            .await?;

        record_settlement(outcome);
        tracing::info!(
            %reservation_id,
            transaction_id = %transaction.id,
            status = reservation.status.as_str(),
            "reservation confirmed"
        );
        self.ctx.notify(settled_kind(outcome), transaction.id).await;
        Ok(reservation)
    }

    async fn try_confirm(
        &self,
        reservation_id: ReservationId,
        outcome: Outcome,
    ) -> Result<(Reservation, Transaction)> {
        let current = self.load(reservation_id).await?;
        let next_status = match outcome {
            Outcome::Succeeded => ReservationStatus::Completed,
            Outcome::Failed => ReservationStatus::Cancelled,
        };
        if !current.status.can_transition_to(next_status) {
            return Err(already_terminal(&current));
        }

        let now = self.ctx.now();
        let tx = found(
            self.ctx.store().transaction(current.transaction_id).await?,
            EntityKind::Transaction,
            current.transaction_id,
        )?;
        let next_tx = settled(&tx, outcome, now)?;
        let next = Reservation {
            status: next_status,
            ..current.record.clone()
        };

        let mut batch = WriteBatch::new();
        batch
            .update(next.clone(), current.version)
            .update(next_tx.clone(), tx.version);

        if outcome == Outcome::Succeeded {
            let gift = found(
                self.ctx.store().gift(current.gift_id).await?,
                EntityKind::Gift,
                current.gift_id,
            )?;
            let sold = gift.sold + current.quantity;
            if sold > gift.stock {
                return Err(ledger_store::LedgerError::InvalidData(format!(
                    "gift {} would sell {sold} of {} units",
                    gift.id, gift.stock
                ))
                .into());
            }
            batch.update(Gift { sold, ..gift.record.clone() }, gift.version);
        }

        self.ctx.store().commit(batch).await?;
        Ok((next, next_tx))
    }

    /// Releases a hold. Only the reserving user or an admin may do so;
    /// cancelling a reservation that already reached a terminal status is a
    /// no-op.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, reservation_id: ReservationId, actor: Actor) -> Result<Reservation> {
        let (reservation, changed) = self
            .ctx
            .retry()
            .run("cancel", |_| self.try_cancel(reservation_id, actor))
            .await?;

        if changed {
            tracing::info!(%reservation_id, actor = %actor.user_id(), "reservation cancelled");
        }
        Ok(reservation)
    }

    async fn try_cancel(
        &self,
        reservation_id: ReservationId,
        actor: Actor,
    ) -> Result<(Reservation, bool)> {
        let current = self.load(reservation_id).await?;
        if !actor.may_release(current.reserved_by) {
            return Err(RegistryError::NotOwner {
                entity: EntityKind::Reservation,
                id: reservation_id.as_i64(),
                actor: actor.user_id(),
            });
        }
        if current.status.is_terminal() {
            return Ok((current.record, false));
        }

        let next = Reservation {
            status: ReservationStatus::Cancelled,
            ..current.record.clone()
        };
        let mut batch = WriteBatch::new();
        batch.update(next.clone(), current.version);
        self.ctx.store().commit(batch).await?;
        Ok((next, true))
    }

    /// Expires every `active` hold whose deadline lies before `now`.
    ///
    /// The pending transaction of an expired hold is left untouched.
    /// Returns the number of reservations this call moved to `expired`.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.ctx.store().reservations_due_for_expiry(now).await?;
        let mut expired = 0;

        for candidate in due {
            let reservation_id = candidate.id;
            match self
                .ctx
                .retry()
                .run("expire_reservation", |_| self.try_expire(reservation_id, now))
                .await
            {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(RegistryError::Contention { attempts }) => {
                    tracing::warn!(%reservation_id, attempts, "skipping contended reservation");
                }
                Err(err) => return Err(err),
            }
        }

        if expired > 0 {
            metrics::counter!("reservations_expired_total").increment(expired as u64);
            tracing::info!(expired, "reservations expired");
        }
        Ok(expired)
    }

    async fn try_expire(&self, reservation_id: ReservationId, now: DateTime<Utc>) -> Result<bool> {
        let current = self.load(reservation_id).await?;
        // Confirm or cancel may have won the race
        if !current.is_overdue(now) {
            return Ok(false);
        }

        let next = Reservation {
            status: ReservationStatus::Expired,
            ..current.record.clone()
        };
        let mut batch = WriteBatch::new();
        batch.update(next, current.version);
        self.ctx.store().commit(batch).await?;
        Ok(true)
    }

    pub async fn get(&self, reservation_id: ReservationId) -> Result<Reservation> {
        Ok(self.load(reservation_id).await?.record)
    }

    /// The gift, provided its list is public and not expired.
    async fn visible_gift(&self, gift_id: GiftId, now: DateTime<Utc>) -> Result<Versioned<Gift>> {
        let gift = found(
            self.ctx.store().gift(gift_id).await?,
            EntityKind::Gift,
            gift_id,
        )?;
        let list = self.ctx.store().gift_list(gift.list_id).await?;
        match list {
            Some(list) if list.is_open(now) => Ok(gift),
            _ => Err(RegistryError::not_found(EntityKind::Gift, gift_id)),
        }
    }

    async fn load(&self, reservation_id: ReservationId) -> Result<Versioned<Reservation>> {
        found(
            self.ctx.store().reservation(reservation_id).await?,
            EntityKind::Reservation,
            reservation_id,
        )
    }
}

fn already_terminal(reservation: &Reservation) -> RegistryError {
    RegistryError::AlreadyTerminal {
        entity: EntityKind::Reservation,
        id: reservation.id.as_i64(),
        status: reservation.status.as_str(),
    }
}
