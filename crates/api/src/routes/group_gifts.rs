//! Group gift campaigns and contributions.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{ContributionId, GroupGiftId, UserId};
use ledger_store::{Contribution, GroupGift, LedgerStore, Money};
use registry::{ContributionReceipt, Settlement};
use serde::{Deserialize, Serialize};

use super::{AppState, OutcomeRequest};
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct GroupGiftResponse {
    pub group_gift: GroupGift,
    pub contributions: Vec<Contribution>,
}

#[derive(Debug, Deserialize)]
pub struct ContributeRequest {
    pub user_id: Option<UserId>,
    pub amount_cents: i64,
    pub message: Option<String>,
}

/// GET /group-gifts/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(group_gift_id): Path<GroupGiftId>,
) -> Result<Json<GroupGiftResponse>, ApiError> {
    let funding = state.registry.funding();
    let group_gift = funding.get(group_gift_id).await?;
    let contributions = funding.contributions(group_gift_id).await?;
    Ok(Json(GroupGiftResponse {
        group_gift,
        contributions,
    }))
}

/// POST /group-gifts/{id}/contributions
#[tracing::instrument(skip(state, req))]
pub async fn contribute<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(group_gift_id): Path<GroupGiftId>,
    Json(req): Json<ContributeRequest>,
) -> Result<(StatusCode, Json<ContributionReceipt>), ApiError> {
    let receipt = state
        .registry
        .funding()
        .contribute(
            group_gift_id,
            req.user_id,
            Money::from_cents(req.amount_cents),
            req.message,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /contributions/{id}/settle
#[tracing::instrument(skip(state))]
pub async fn settle<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(contribution_id): Path<ContributionId>,
    Json(req): Json<OutcomeRequest>,
) -> Result<Json<Settlement>, ApiError> {
    let settlement = state
        .registry
        .funding()
        .settle(contribution_id, req.outcome)
        .await?;
    Ok(Json(settlement))
}
