//! Gift lists, gifts and campaign set-up.

use chrono::{DateTime, Utc};
use common::{GiftId, GiftListId, GroupGiftId, UserId};
use ledger_store::{
    Currency, EntityKind, Gift, GiftList, GroupGift, GroupGiftStatus, LedgerStore,
    LedgerStoreExt, Money, Visibility, WriteBatch,
};
use serde::{Deserialize, Serialize};

use crate::context::{EngineContext, found};
use crate::error::{RegistryError, Result};

/// Attributes of a gift being added to a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGift {
    pub name: String,
    pub price: Money,
    pub currency: Currency,
    pub stock: u32,
    pub is_group_gift: bool,
}

/// Stock figures of a gift at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub gift_id: GiftId,
    pub stock: u32,
    pub sold: u32,
    /// Units covered by active reservations.
    pub held: u32,
    pub available: u32,
}

/// Creates the rows the managers operate on.
#[derive(Clone)]
pub struct Catalog<S> {
    ctx: EngineContext<S>,
}

impl<S: LedgerStore> Catalog<S> {
    pub fn new(ctx: EngineContext<S>) -> Self {
        Self { ctx }
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_gift_list(
        &self,
        owner: UserId,
        title: &str,
        visibility: Visibility,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<GiftList> {
        let title = title.trim();
        if title.is_empty() {
            return Err(RegistryError::Validation("list title must not be empty".to_string()));
        }

        let list = GiftList {
            id: self.ctx.next_id(EntityKind::GiftList).await?,
            owner,
            title: title.to_string(),
            visibility,
            expires_at,
        };
        let mut batch = WriteBatch::new();
        batch.insert(list.clone());
        self.ctx.store().commit(batch).await?;

        tracing::info!(list_id = %list.id, %owner, "gift list created");
        Ok(list)
    }

    /// Adds a gift to a list owned by `owner`.
    #[tracing::instrument(skip(self))]
    pub async fn add_gift(&self, list_id: GiftListId, owner: UserId, gift: NewGift) -> Result<Gift> {
        let name = gift.name.trim();
        if name.is_empty() {
            return Err(RegistryError::Validation("gift name must not be empty".to_string()));
        }
        if gift.price.is_negative() {
            return Err(RegistryError::InvalidAmount { amount: gift.price });
        }
        if gift.stock == 0 {
            return Err(RegistryError::InvalidQuantity { quantity: 0 });
        }

        let list = found(
            self.ctx.store().gift_list(list_id).await?,
            EntityKind::GiftList,
            list_id,
        )?;
        if list.owner != owner {
            return Err(RegistryError::NotOwner {
                entity: EntityKind::GiftList,
                id: list_id.as_i64(),
                actor: owner,
            });
        }

        let created = Gift {
            id: self.ctx.next_id(EntityKind::Gift).await?,
            list_id,
            name: name.to_string(),
            price: gift.price,
            currency: gift.currency,
            stock: gift.stock,
            sold: 0,
            is_group_gift: gift.is_group_gift,
        };
        let mut batch = WriteBatch::new();
        batch.insert(created.clone());
        self.ctx.store().commit(batch).await?;

        tracing::info!(gift_id = %created.id, %list_id, stock = created.stock, "gift added");
        Ok(created)
    }

    /// Opens the crowdfunding campaign of a group gift. A gift has at most
    /// one campaign.
    #[tracing::instrument(skip(self))]
    pub async fn open_group_gift(
        &self,
        gift_id: GiftId,
        target_amount: Money,
        min_contribution: Money,
        expiry_date: DateTime<Utc>,
    ) -> Result<GroupGift> {
        if !target_amount.is_positive() {
            return Err(RegistryError::InvalidAmount {
                amount: target_amount,
            });
        }
        if min_contribution.is_negative() {
            return Err(RegistryError::InvalidAmount {
                amount: min_contribution,
            });
        }

        let id: GroupGiftId = self.ctx.next_id(EntityKind::GroupGift).await?;
        let campaign = self
            .ctx
            .retry()
            .run("open_group_gift", |_| async move {
                let gift = found(
                    self.ctx.store().gift(gift_id).await?,
                    EntityKind::Gift,
                    gift_id,
                )?;
                if !gift.is_group_gift {
                    return Err(RegistryError::NotGroupGift { gift_id });
                }
                if let Some(existing) = self.ctx.store().group_gift_for_gift(gift_id).await? {
                    return Err(RegistryError::CampaignExists {
                        gift_id,
                        group_gift_id: existing.id,
                    });
                }

                let campaign = GroupGift {
                    id,
                    gift_id,
                    target_amount,
                    current_amount: Money::ZERO,
                    min_contribution,
                    currency: gift.currency.clone(),
                    status: GroupGiftStatus::Active,
                    expiry_date,
                    completed_at: None,
                };

                // The gift guard keeps two concurrent openings from both landing
                let mut batch = WriteBatch::new();
                batch
                    .insert(campaign.clone())
                    .update(gift.record.clone(), gift.version);
                self.ctx.store().commit(batch).await?;
                Ok(campaign)
            })
            .await?;

        tracing::info!(group_gift_id = %campaign.id, %gift_id, target = %target_amount, "campaign opened");
        Ok(campaign)
    }

    pub async fn gift_list(&self, list_id: GiftListId) -> Result<GiftList> {
        Ok(found(
            self.ctx.store().gift_list(list_id).await?,
            EntityKind::GiftList,
            list_id,
        )?
        .record)
    }

    pub async fn gift(&self, gift_id: GiftId) -> Result<Gift> {
        Ok(found(self.ctx.store().gift(gift_id).await?, EntityKind::Gift, gift_id)?.record)
    }

    /// The campaign attached to a gift, if one was opened.
    pub async fn group_gift_for_gift(&self, gift_id: GiftId) -> Result<Option<GroupGift>> {
        Ok(self
            .ctx
            .store()
            .group_gift_for_gift(gift_id)
            .await?
            .map(|g| g.record))
    }

    /// `stock - sold - held` for the gift, as of now.
    pub async fn availability(&self, gift_id: GiftId) -> Result<Availability> {
        let gift = self.gift(gift_id).await?;
        let held = self.ctx.store().held_units(gift_id, self.ctx.now()).await?;
        Ok(Availability {
            gift_id,
            stock: gift.stock,
            sold: gift.sold,
            held,
            available: gift.available(held),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use ledger_store::InMemoryLedgerStore;

    use super::*;
    use crate::config::RegistryConfig;

    const OWNER: UserId = UserId::new(1);

    fn catalog() -> Catalog<InMemoryLedgerStore> {
        Catalog::new(EngineContext::new(
            InMemoryLedgerStore::new(),
            &RegistryConfig::default(),
        ))
    }

    fn new_gift(is_group_gift: bool) -> NewGift {
        NewGift {
            name: "Stand mixer".to_string(),
            price: Money::from_units(300),
            currency: Currency::new("GBP").unwrap(),
            stock: 1,
            is_group_gift,
        }
    }

    #[tokio::test]
    async fn create_list_and_gift() {
        let catalog = catalog();
        let list = catalog
            .create_gift_list(OWNER, "  Wedding  ", Visibility::Public, None)
            .await
            .unwrap();
        assert_eq!(list.title, "Wedding");

        let gift = catalog.add_gift(list.id, OWNER, new_gift(false)).await.unwrap();
        assert_eq!(gift.sold, 0);

        let availability = catalog.availability(gift.id).await.unwrap();
        assert_eq!(availability.available, 1);
        assert_eq!(availability.held, 0);
    }

    #[tokio::test]
    async fn only_owner_adds_gifts() {
        let catalog = catalog();
        let list = catalog
            .create_gift_list(OWNER, "Birthday", Visibility::Public, None)
            .await
            .unwrap();
        let result = catalog.add_gift(list.id, UserId::new(2), new_gift(false)).await;
        assert!(matches!(result, Err(RegistryError::NotOwner { .. })));
    }

    #[tokio::test]
    async fn rejects_empty_title_and_zero_stock() {
        let catalog = catalog();
        let empty = catalog.create_gift_list(OWNER, " ", Visibility::Public, None).await;
        assert!(matches!(empty, Err(RegistryError::Validation(_))));

        let list = catalog
            .create_gift_list(OWNER, "Birthday", Visibility::Public, None)
            .await
            .unwrap();
        let mut gift = new_gift(false);
        gift.stock = 0;
        let zero = catalog.add_gift(list.id, OWNER, gift).await;
        assert!(matches!(zero, Err(RegistryError::InvalidQuantity { .. })));
    }

    #[tokio::test]
    async fn one_campaign_per_group_gift() {
        let catalog = catalog();
        let list = catalog
            .create_gift_list(OWNER, "Anniversary", Visibility::Public, None)
            .await
            .unwrap();
        let plain = catalog.add_gift(list.id, OWNER, new_gift(false)).await.unwrap();
        let group = catalog.add_gift(list.id, OWNER, new_gift(true)).await.unwrap();
        let expiry = Utc::now() + Duration::days(30);

        let not_group = catalog
            .open_group_gift(plain.id, Money::from_units(300), Money::from_units(10), expiry)
            .await;
        assert!(matches!(not_group, Err(RegistryError::NotGroupGift { .. })));

        let bad_target = catalog
            .open_group_gift(group.id, Money::ZERO, Money::ZERO, expiry)
            .await;
        assert!(matches!(bad_target, Err(RegistryError::InvalidAmount { .. })));

        let campaign = catalog
            .open_group_gift(group.id, Money::from_units(300), Money::from_units(10), expiry)
            .await
            .unwrap();
        assert_eq!(campaign.status, GroupGiftStatus::Active);
        assert_eq!(campaign.currency.as_str(), "GBP");

        let second = catalog
            .open_group_gift(group.id, Money::from_units(300), Money::ZERO, expiry)
            .await;
        assert!(matches!(second, Err(RegistryError::CampaignExists { .. })));
        assert_eq!(
            catalog.group_gift_for_gift(group.id).await.unwrap().unwrap().id,
            campaign.id
        );
    }
}
