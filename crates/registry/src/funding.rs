//! Group funding manager: contributions toward crowdfunded gifts.

use chrono::{DateTime, Utc};
use common::{ContributionId, GroupGiftId, TransactionId, UserId};
use ledger_store::{
    Contribution, EntityKind, GroupGift, GroupGiftStatus, LedgerStore, Money, Outcome,
    Transaction, TransactionScope, Versioned, WriteBatch,
};
use serde::{Deserialize, Serialize};

use crate::context::{EngineContext, found};
use crate::error::{RegistryError, Result};
use crate::notify::NotificationKind;
use crate::transactions::{pending, record_settlement, settled, settled_kind};

/// The contribution and the pending payment backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionReceipt {
    pub contribution: Contribution,
    pub transaction: Transaction,
}

/// Result of settling a contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub transaction: Transaction,
    pub group_gift: GroupGift,
    /// True only for the settlement whose commit flipped the campaign to
    /// `completed`.
    pub completed_campaign: bool,
}

/// Whether `amount` satisfies the campaign minimum. A contribution that
/// closes the remaining gap is accepted even below the minimum.
pub fn meets_minimum(campaign: &GroupGift, amount: Money) -> bool {
    let remaining = campaign.remaining();
    amount >= campaign.min_contribution || (remaining.is_positive() && amount >= remaining)
}

/// Accepts contributions, tracks progress and closes campaigns.
///
/// `current_amount` only ever grows by settled, succeeded contributions, so a
/// failed payment needs no reversal.
#[derive(Clone)]
pub struct GroupFundingManager<S> {
    ctx: EngineContext<S>,
}

impl<S: LedgerStore> GroupFundingManager<S> {
    pub fn new(ctx: EngineContext<S>) -> Self {
        Self { ctx }
    }

    /// Records a contribution with its `pending` transaction.
    #[tracing::instrument(skip(self, message))]
    pub async fn contribute(
        &self,
        group_gift_id: GroupGiftId,
        contributor: Option<UserId>,
        amount: Money,
        message: Option<String>,
    ) -> Result<ContributionReceipt> {
        if !amount.is_positive() {
            return Err(RegistryError::InvalidAmount { amount });
        }
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        let contribution_id: ContributionId = self.ctx.next_id(EntityKind::Contribution).await?;
        let transaction_id: TransactionId = self.ctx.next_id(EntityKind::Transaction).await?;

        let receipt = self
            .ctx
            .retry()
            .run("contribute", |_| {
                self.try_contribute(
                    group_gift_id,
                    contributor,
                    amount,
                    message.as_deref(),
                    contribution_id,
                    transaction_id,
                )
            })
            .await?;

        metrics::counter!("contributions_received_total").increment(1);
        tracing::info!(%group_gift_id, %contribution_id, %amount, "contribution received");
        self.ctx
            .notify(NotificationKind::ContributionReceived, contribution_id)
            .await;
        Ok(receipt)
    }

    async fn try_contribute(
        &self,
        group_gift_id: GroupGiftId,
        contributor: Option<UserId>,
        amount: Money,
        message: Option<&str>,
        contribution_id: ContributionId,
        transaction_id: TransactionId,
    ) -> Result<ContributionReceipt> {
        let now = self.ctx.now();
        let campaign = self.load(group_gift_id).await?;
        if !campaign.status.accepts_contributions() || now > campaign.expiry_date {
            return Err(RegistryError::CampaignNotActive {
                group_gift_id,
                status: campaign.status,
            });
        }
        if !meets_minimum(&campaign, amount) {
            return Err(RegistryError::BelowMinimum {
                amount,
                minimum: campaign.min_contribution,
                remaining: campaign.remaining(),
            });
        }

        let gift = found(
            self.ctx.store().gift(campaign.gift_id).await?,
            EntityKind::Gift,
            campaign.gift_id,
        )?;
        let list = self.ctx.store().gift_list(gift.list_id).await?;
        if !list.is_some_and(|l| l.is_open(now)) {
            return Err(RegistryError::not_found(EntityKind::GroupGift, group_gift_id));
        }

        let contribution = Contribution {
            id: contribution_id,
            group_gift_id,
            contributor,
            transaction_id,
            amount,
            message: message.map(str::to_string),
            created_at: now,
        };
        let transaction = pending(
            transaction_id,
            gift.list_id,
            TransactionScope::Contribution {
                group_gift_id,
                contribution_id,
            },
            amount,
            campaign.currency.clone(),
            now,
        );

        // Rewriting the campaign at its read version rejects the batch if it
        // completed or expired in the meantime
        let mut batch = WriteBatch::new();
        batch
            .insert(contribution.clone())
            .insert(transaction.clone())
            .update(campaign.record.clone(), campaign.version);
        self.ctx.store().commit(batch).await?;

        Ok(ContributionReceipt {
            contribution,
            transaction,
        })
    }

    /// Settles the payment behind a contribution.
    ///
    /// On success the amount is added to the campaign in the same commit as
    /// the transaction transition. The first commit that reaches the target
    /// completes the campaign and is the only one to announce it.
    #[tracing::instrument(skip(self))]
    pub async fn settle(&self, contribution_id: ContributionId, outcome: Outcome) -> Result<Settlement> {
        let settlement = self
            .ctx
            .retry()
            .run("settle_contribution", |_| self.try_settle(contribution_id, outcome))
            .await?;

        record_settlement(outcome);
        tracing::info!(
            %contribution_id,
            transaction_id = %settlement.transaction.id,
            current = %settlement.group_gift.current_amount,
            target = %settlement.group_gift.target_amount,
            "contribution settled"
        );
        self.ctx
            .notify(settled_kind(outcome), settlement.transaction.id)
            .await;

        if settlement.completed_campaign {
            metrics::counter!("campaigns_completed_total").increment(1);
            tracing::info!(group_gift_id = %settlement.group_gift.id, "campaign completed");
            self.ctx
                .notify(NotificationKind::CampaignCompleted, settlement.group_gift.id)
                .await;
        }

        Ok(settlement)
    }

    async fn try_settle(&self, contribution_id: ContributionId, outcome: Outcome) -> Result<Settlement> {
        let contribution = found(
            self.ctx.store().contribution(contribution_id).await?,
            EntityKind::Contribution,
            contribution_id,
        )?;
        let tx = found(
            self.ctx.store().transaction(contribution.transaction_id).await?,
            EntityKind::Transaction,
            contribution.transaction_id,
        )?;
        let now = self.ctx.now();
        let next_tx = settled(&tx, outcome, now)?;
        let campaign = self.load(contribution.group_gift_id).await?;

        let mut batch = WriteBatch::new();
        batch.update(next_tx.clone(), tx.version);

        if outcome == Outcome::Failed {
            self.ctx.store().commit(batch).await?;
            return Ok(Settlement {
                transaction: next_tx,
                group_gift: campaign.record,
                completed_campaign: false,
            });
        }

        // Completed and expired campaigns still count the money; neither is
        // re-flipped
        let mut next = campaign.record.clone();
        next.current_amount = next
            .current_amount
            .checked_add(contribution.amount)
            .ok_or(RegistryError::InvalidAmount {
                amount: contribution.amount,
            })?;
        let completes = next.status == GroupGiftStatus::Active
            && next.current_amount >= next.target_amount;
        if completes {
            next.status = GroupGiftStatus::Completed;
            next.completed_at = Some(now);
        }

        batch.update(next.clone(), campaign.version);
        self.ctx.store().commit(batch).await?;

        Ok(Settlement {
            transaction: next_tx,
            group_gift: next,
            completed_campaign: completes,
        })
    }

    /// Expires active campaigns past their expiry date that are still below
    /// target. Completed campaigns are never touched.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.ctx.store().group_gifts_due_for_expiry(now).await?;
        let mut expired = 0;

        for candidate in due {
            let group_gift_id = candidate.id;
            match self
                .ctx
                .retry()
                .run("expire_campaign", |_| self.try_expire(group_gift_id, now))
                .await
            {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(RegistryError::Contention { attempts }) => {
                    tracing::warn!(%group_gift_id, attempts, "skipping contended campaign");
                }
                Err(err) => return Err(err),
            }
        }

        if expired > 0 {
            metrics::counter!("campaigns_expired_total").increment(expired as u64);
            tracing::info!(expired, "campaigns expired");
        }
        Ok(expired)
    }

    async fn try_expire(&self, group_gift_id: GroupGiftId, now: DateTime<Utc>) -> Result<bool> {
        let current = self.load(group_gift_id).await?;
        if !current.is_overdue(now) {
            return Ok(false);
        }

        let next = GroupGift {
            status: GroupGiftStatus::Expired,
            ..current.record.clone()
        };
        let mut batch = WriteBatch::new();
        batch.update(next, current.version);
        self.ctx.store().commit(batch).await?;
        Ok(true)
    }

    pub async fn get(&self, group_gift_id: GroupGiftId) -> Result<GroupGift> {
        Ok(self.load(group_gift_id).await?.record)
    }

    pub async fn contributions(&self, group_gift_id: GroupGiftId) -> Result<Vec<Contribution>> {
        self.load(group_gift_id).await?;
        Ok(self
            .ctx
            .store()
            .contributions_for_group_gift(group_gift_id)
            .await?
            .into_iter()
            .map(|c| c.record)
            .collect())
    }

    async fn load(&self, group_gift_id: GroupGiftId) -> Result<Versioned<GroupGift>> {
        found(
            self.ctx.store().group_gift(group_gift_id).await?,
            EntityKind::GroupGift,
            group_gift_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use common::{GiftId, GiftListId};
    use ledger_store::{
        Currency, Gift, GiftList, InMemoryLedgerStore, TransactionStatus, Visibility,
    };

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::RegistryConfig;
    use crate::notify::InMemoryNotificationEmitter;

    const CAMPAIGN: GroupGiftId = GroupGiftId::new(1);

    struct Fixture {
        manager: GroupFundingManager<InMemoryLedgerStore>,
        clock: Arc<ManualClock>,
        emitter: InMemoryNotificationEmitter,
    }

    fn units(n: i64) -> Money {
        Money::from_units(n)
    }

    async fn fixture(target: i64, current: i64, min: i64) -> Fixture {
        fixture_in_cents(units(target), units(current), units(min)).await
    }

    async fn fixture_in_cents(target: Money, current: Money, min: Money) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = InMemoryLedgerStore::new();
        let mut batch = WriteBatch::new();
        batch
            .insert(GiftList {
                id: GiftListId::new(1),
                owner: UserId::new(1),
                title: "Graduation".to_string(),
                visibility: Visibility::Public,
                expires_at: None,
            })
            .insert(Gift {
                id: GiftId::new(1),
                list_id: GiftListId::new(1),
                name: "Bicycle".to_string(),
                price: target,
                currency: Currency::new("EUR").unwrap(),
                stock: 1,
                sold: 0,
                is_group_gift: true,
            })
            .insert(GroupGift {
                id: CAMPAIGN,
                gift_id: GiftId::new(1),
                target_amount: target,
                current_amount: current,
                min_contribution: min,
                currency: Currency::new("EUR").unwrap(),
                status: GroupGiftStatus::Active,
                expiry_date: clock.now() + Duration::days(7),
                completed_at: None,
            });
        store.commit(batch).await.unwrap();

        let emitter = InMemoryNotificationEmitter::new();
        let ctx = EngineContext::new(store, &RegistryConfig::default())
            .with_clock(clock.clone())
            .with_emitter(Arc::new(emitter.clone()));

        Fixture {
            manager: GroupFundingManager::new(ctx),
            clock,
            emitter,
        }
    }

    #[tokio::test]
    async fn below_minimum_unless_closing_gap() {
        let f = fixture(100, 80, 10).await;
        let small = f.manager.contribute(CAMPAIGN, None, units(5), None).await;
        assert!(matches!(small, Err(RegistryError::BelowMinimum { .. })));

        let f = fixture(100, 97, 10).await;
        let closing = f.manager.contribute(CAMPAIGN, None, units(5), None).await;
        assert!(closing.is_ok());
    }

    #[tokio::test]
    async fn contribute_opens_pending_and_announces() {
        let f = fixture(100, 0, 10).await;
        let receipt = f
            .manager
            .contribute(CAMPAIGN, Some(UserId::new(3)), units(25), Some("  Enjoy! ".to_string()))
            .await
            .unwrap();

        assert_eq!(receipt.contribution.message.as_deref(), Some("Enjoy!"));
        assert_eq!(receipt.transaction.status, TransactionStatus::Pending);
        assert_eq!(receipt.transaction.amount, units(25));
        // Pending money is not counted
        assert_eq!(f.manager.get(CAMPAIGN).await.unwrap().current_amount, units(0));
        assert_eq!(f.emitter.count(NotificationKind::ContributionReceived), 1);
    }

    #[tokio::test]
    async fn non_positive_amount_is_invalid() {
        let f = fixture(100, 0, 0).await;
        let result = f.manager.contribute(CAMPAIGN, None, Money::ZERO, None).await;
        assert!(matches!(result, Err(RegistryError::InvalidAmount { .. })));
    }

    #[tokio::test]
    async fn settle_success_completes_once() {
        let f = fixture(100, 90, 10).await;
        let first = f.manager.contribute(CAMPAIGN, None, units(15), None).await.unwrap();
        let second = f.manager.contribute(CAMPAIGN, None, units(15), None).await.unwrap();

        let s1 = f.manager.settle(first.contribution.id, Outcome::Succeeded).await.unwrap();
        assert!(s1.completed_campaign);
        assert_eq!(s1.group_gift.status, GroupGiftStatus::Completed);

        // Over-funding is recorded without a second completion
        let s2 = f.manager.settle(second.contribution.id, Outcome::Succeeded).await.unwrap();
        assert!(!s2.completed_campaign);
        assert_eq!(s2.group_gift.current_amount, units(120));
        assert_eq!(f.emitter.count(NotificationKind::CampaignCompleted), 1);

        let late = f.manager.contribute(CAMPAIGN, None, units(10), None).await;
        assert!(matches!(late, Err(RegistryError::CampaignNotActive { .. })));
    }

    #[tokio::test]
    async fn settlement_overflowing_total_is_rejected() {
        let f = fixture_in_cents(Money::from_cents(i64::MAX), Money::ZERO, Money::ZERO).await;
        let huge = Money::from_cents(i64::MAX - 10);
        let first = f.manager.contribute(CAMPAIGN, None, huge, None).await.unwrap();
        let second = f.manager.contribute(CAMPAIGN, None, huge, None).await.unwrap();

        let s1 = f.manager.settle(first.contribution.id, Outcome::Succeeded).await.unwrap();
        assert_eq!(s1.group_gift.current_amount, huge);

        let s2 = f.manager.settle(second.contribution.id, Outcome::Succeeded).await;
        assert!(matches!(s2, Err(RegistryError::InvalidAmount { amount }) if amount == huge));

        // Nothing was committed for the rejected settlement
        let campaign = f.manager.get(CAMPAIGN).await.unwrap();
        assert_eq!(campaign.current_amount, huge);
        assert_eq!(campaign.status, GroupGiftStatus::Active);
        let pending = f.manager.settle(second.contribution.id, Outcome::Failed).await.unwrap();
        assert_eq!(pending.transaction.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn failed_settlement_adds_nothing() {
        let f = fixture(100, 0, 0).await;
        let receipt = f.manager.contribute(CAMPAIGN, None, units(40), None).await.unwrap();

        let settlement = f
            .manager
            .settle(receipt.contribution.id, Outcome::Failed)
            .await
            .unwrap();
        assert_eq!(settlement.transaction.status, TransactionStatus::Failed);
        assert_eq!(settlement.group_gift.current_amount, units(0));
        assert_eq!(f.emitter.count(NotificationKind::TransactionFailed), 1);

        let again = f.manager.settle(receipt.contribution.id, Outcome::Succeeded).await;
        assert!(matches!(again, Err(RegistryError::AlreadyTerminal { .. })));
    }

    #[tokio::test]
    async fn contribution_after_expiry_date_is_rejected() {
        let f = fixture(100, 0, 0).await;
        f.clock.advance(Duration::days(8));
        let result = f.manager.contribute(CAMPAIGN, None, units(10), None).await;
        assert!(matches!(
            result,
            Err(RegistryError::CampaignNotActive { status: GroupGiftStatus::Active, .. })
        ));
    }

    #[tokio::test]
    async fn sweep_expires_underfunded_campaign() {
        let f = fixture(100, 0, 0).await;
        let pending = f.manager.contribute(CAMPAIGN, None, units(30), None).await.unwrap();

        f.clock.advance(Duration::days(8));
        let now = f.clock.now();
        assert_eq!(f.manager.sweep_expired(now).await.unwrap(), 1);
        assert_eq!(f.manager.sweep_expired(now).await.unwrap(), 0);
        assert_eq!(f.manager.get(CAMPAIGN).await.unwrap().status, GroupGiftStatus::Expired);

        // Money paid in late still counts but does not revive the campaign
        let settlement = f
            .manager
            .settle(pending.contribution.id, Outcome::Succeeded)
            .await
            .unwrap();
        assert_eq!(settlement.group_gift.status, GroupGiftStatus::Expired);
        assert_eq!(settlement.group_gift.current_amount, units(30));
        assert!(!settlement.completed_campaign);
    }

    #[tokio::test]
    async fn sweep_leaves_completed_campaign() {
        let f = fixture(100, 0, 0).await;
        let receipt = f.manager.contribute(CAMPAIGN, None, units(100), None).await.unwrap();
        f.manager
            .settle(receipt.contribution.id, Outcome::Succeeded)
            .await
            .unwrap();

        f.clock.advance(Duration::days(8));
        assert_eq!(f.manager.sweep_expired(f.clock.now()).await.unwrap(), 0);
        assert_eq!(f.manager.get(CAMPAIGN).await.unwrap().status, GroupGiftStatus::Completed);
    }

    #[test]
    fn minimum_rule() {
        let campaign = |current: i64| GroupGift {
            id: CAMPAIGN,
            gift_id: GiftId::new(1),
            target_amount: units(100),
            current_amount: units(current),
            min_contribution: units(10),
            currency: Currency::new("EUR").unwrap(),
            status: GroupGiftStatus::Active,
            expiry_date: Utc::now(),
            completed_at: None,
        };
        assert!(!meets_minimum(&campaign(80), units(5)));
        assert!(meets_minimum(&campaign(97), units(5)));
        assert!(meets_minimum(&campaign(97), units(3)));
        assert!(!meets_minimum(&campaign(97), units(2)));
        assert!(meets_minimum(&campaign(0), units(10)));
        // Gap already closed: the minimum applies again
        assert!(!meets_minimum(&campaign(100), units(5)));
    }
}
