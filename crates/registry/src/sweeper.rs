//! Periodic expiry of stale reservations and campaigns.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ledger_store::LedgerStore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::context::EngineContext;
use crate::error::Result;
use crate::funding::GroupFundingManager;
use crate::reservations::ReservationManager;

/// What one pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub reservations_expired: usize,
    pub campaigns_expired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.reservations_expired == 0 && self.campaigns_expired == 0
    }
}

/// Demotes overdue reservations and underfunded campaigns to `expired`.
///
/// Every transition is a compare-and-update on the current status, so passes
/// may overlap with each other and with user commands.
#[derive(Clone)]
pub struct ExpirySweeper<S> {
    ctx: EngineContext<S>,
    reservations: ReservationManager<S>,
    funding: GroupFundingManager<S>,
}

impl<S: LedgerStore + Clone> ExpirySweeper<S> {
    pub fn new(ctx: EngineContext<S>) -> Self {
        Self {
            reservations: ReservationManager::new(ctx.clone()),
            funding: GroupFundingManager::new(ctx.clone()),
            ctx,
        }
    }

    /// Runs one pass as of `now`.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let started = Instant::now();

        let reservations_expired = self.reservations.sweep_expired(now).await?;
        let campaigns_expired = self.funding.sweep_expired(now).await?;

        metrics::histogram!("sweep_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok(SweepReport {
            reservations_expired,
            campaigns_expired,
        })
    }

    /// Sweeps every `interval` until `shutdown` turns true or its sender is
    /// dropped. A failed pass is logged and the next one runs on schedule.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs_f64(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once(self.ctx.now()).await {
                        Ok(report) if !report.is_empty() => {
                            tracing::info!(
                                reservations = report.reservations_expired,
                                campaigns = report.campaigns_expired,
                                "sweep pass finished"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => tracing::error!(error = %err, "sweep pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use common::{GiftId, GiftListId, GroupGiftId, ReservationId, TransactionId, UserId};
    use ledger_store::{
        Currency, Gift, GiftList, GroupGift, GroupGiftStatus, InMemoryLedgerStore, Money,
        Reservation, ReservationStatus, Visibility, WriteBatch,
    };

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RegistryConfig;

    async fn seeded(now: DateTime<Utc>) -> InMemoryLedgerStore {
        let store = InMemoryLedgerStore::new();
        let eur = Currency::new("EUR").unwrap();
        let mut batch = WriteBatch::new();
        batch
            .insert(GiftList {
                id: GiftListId::new(1),
                owner: UserId::new(1),
                title: "Moving in".to_string(),
                visibility: Visibility::Public,
                expires_at: None,
            })
            .insert(Gift {
                id: GiftId::new(1),
                list_id: GiftListId::new(1),
                name: "Lamp".to_string(),
                price: Money::from_units(30),
                currency: eur.clone(),
                stock: 2,
                sold: 0,
                is_group_gift: false,
            })
            .insert(Reservation {
                id: ReservationId::new(1),
                gift_id: GiftId::new(1),
                reserved_by: Some(UserId::new(2)),
                quantity: 1,
                reserved_until: now - ChronoDuration::minutes(1),
                status: ReservationStatus::Active,
                transaction_id: TransactionId::new(1),
                created_at: now - ChronoDuration::hours(1),
            })
            .insert(GroupGift {
                id: GroupGiftId::new(1),
                gift_id: GiftId::new(2),
                target_amount: Money::from_units(100),
                current_amount: Money::from_units(10),
                min_contribution: Money::ZERO,
                currency: eur,
                status: GroupGiftStatus::Active,
                expiry_date: now - ChronoDuration::days(1),
                completed_at: None,
            });
        store.commit(batch).await.unwrap();
        store
    }

    fn sweeper(store: InMemoryLedgerStore) -> ExpirySweeper<InMemoryLedgerStore> {
        ExpirySweeper::new(EngineContext::new(store, &RegistryConfig::default()))
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let now = Utc::now();
        let sweeper = sweeper(seeded(now).await);

        let first = sweeper.sweep_once(now).await.unwrap();
        assert_eq!(
            first,
            SweepReport {
                reservations_expired: 1,
                campaigns_expired: 1
            }
        );

        let second = sweeper.sweep_once(now).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn nothing_due_before_deadline() {
        let now = Utc::now();
        let sweeper = sweeper(seeded(now).await);
        let report = sweeper
            .sweep_once(now - ChronoDuration::days(2))
            .await
            .unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_until_shutdown() {
        let now = Utc::now();
        let store = seeded(now).await;
        let ctx = EngineContext::new(store.clone(), &RegistryConfig::default())
            .with_clock(Arc::new(ManualClock::new(now)));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(ExpirySweeper::new(ctx).run(Duration::from_secs(60), rx));

        // The first tick fires immediately
        tokio::time::sleep(Duration::from_secs(1)).await;
        let reservation = store.reservation(ReservationId::new(1)).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Expired);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
