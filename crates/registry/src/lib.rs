//! Consistency engine for gift registries.
//!
//! Reservations hold units of a gift for a limited time, group gifts collect
//! contributions toward a target and every payment attempt is tracked as a
//! transaction. All mutations are optimistic: each commit rewrites the rows
//! it read at their read version and retries on conflict, so concurrent
//! callers can never oversell a gift or double-complete a campaign.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod funding;
pub mod notify;
pub mod reservations;
pub mod retry;
pub mod sweeper;
pub mod transactions;

use common::TransactionId;
use ledger_store::{LedgerStore, Outcome, ReservationStatus, Transaction, TransactionScope};

pub use catalog::{Availability, Catalog, NewGift};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RegistryConfig;
pub use context::EngineContext;
pub use error::{RegistryError, Result};
pub use funding::{ContributionReceipt, GroupFundingManager, Settlement, meets_minimum};
pub use notify::{
    EmitError, InMemoryNotificationEmitter, Notification, NotificationEmitter, NotificationKind,
    TracingNotificationEmitter,
};
pub use reservations::{Actor, ReservationManager, ReservationReceipt};
pub use retry::ConflictRetry;
pub use sweeper::{ExpirySweeper, SweepReport};
pub use transactions::TransactionLedger;

/// One handle over every component, sharing a single context.
#[derive(Clone)]
pub struct Registry<S> {
    ctx: EngineContext<S>,
    catalog: Catalog<S>,
    reservations: ReservationManager<S>,
    funding: GroupFundingManager<S>,
    transactions: TransactionLedger<S>,
    sweeper: ExpirySweeper<S>,
}

impl<S: LedgerStore + Clone> Registry<S> {
    pub fn new(store: S, config: &RegistryConfig) -> Self {
        Self::from_context(EngineContext::new(store, config))
    }

    /// Builds the components over a prepared context, e.g. one with a
    /// manual clock or a recording emitter.
    pub fn from_context(ctx: EngineContext<S>) -> Self {
        Self {
            catalog: Catalog::new(ctx.clone()),
            reservations: ReservationManager::new(ctx.clone()),
            funding: GroupFundingManager::new(ctx.clone()),
            transactions: TransactionLedger::new(ctx.clone()),
            sweeper: ExpirySweeper::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &EngineContext<S> {
        &self.ctx
    }

    pub fn catalog(&self) -> &Catalog<S> {
        &self.catalog
    }

    pub fn reservations(&self) -> &ReservationManager<S> {
        &self.reservations
    }

    pub fn funding(&self) -> &GroupFundingManager<S> {
        &self.funding
    }

    pub fn transactions(&self) -> &TransactionLedger<S> {
        &self.transactions
    }

    pub fn sweeper(&self) -> &ExpirySweeper<S> {
        &self.sweeper
    }

    /// Settles a transaction through whichever component owns it.
    ///
    /// A reservation transaction whose hold is still active goes through
    /// `confirm`, a contribution transaction through the funding manager.
    /// Everything else is settled by the ledger directly.
    #[tracing::instrument(skip(self))]
    pub async fn settle_transaction(
        &self,
        transaction_id: TransactionId,
        outcome: Outcome,
    ) -> Result<Transaction> {
        let transaction = self.transactions.get(transaction_id).await?;

        match transaction.scope {
            TransactionScope::Reservation { reservation_id, .. } => {
                let reservation = self.reservations.get(reservation_id).await?;
                if reservation.status == ReservationStatus::Active {
                    match self.reservations.confirm(reservation_id, outcome).await {
                        Ok(_) => return self.transactions.get(transaction_id).await,
                        // Expired or cancelled since the read above
                        Err(RegistryError::AlreadyTerminal { .. }) => {}
                        Err(err) => return Err(err),
                    }
                }
                self.transactions.settle(transaction_id, outcome).await
            }
            TransactionScope::Contribution {
                contribution_id, ..
            } => Ok(self.funding.settle(contribution_id, outcome).await?.transaction),
            TransactionScope::Unscoped => self.transactions.settle(transaction_id, outcome).await,
        }
    }

    /// Runs one expiry pass as of the context clock.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        self.sweeper.sweep_once(self.ctx.now()).await
    }
}
