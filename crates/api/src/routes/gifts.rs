//! Gift endpoints: availability, reservations and campaign opening.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use common::{GiftId, UserId};
use ledger_store::{Gift, GroupGift, LedgerStore, Money};
use registry::{Availability, ReservationReceipt};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

/// Hold length when the caller does not pick one.
const DEFAULT_HOLD_SECS: i64 = 15 * 60;

#[derive(Debug, Serialize)]
pub struct GiftResponse {
    pub gift: Gift,
    pub availability: Availability,
    pub group_gift: Option<GroupGift>,
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub user_id: Option<UserId>,
    pub quantity: u32,
    pub hold_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OpenGroupGiftRequest {
    pub target_cents: i64,
    #[serde(default)]
    pub min_contribution_cents: i64,
    pub expiry_date: DateTime<Utc>,
}

/// GET /gifts/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(gift_id): Path<GiftId>,
) -> Result<Json<GiftResponse>, ApiError> {
    let catalog = state.registry.catalog();
    let gift = catalog.gift(gift_id).await?;
    let availability = catalog.availability(gift_id).await?;
    let group_gift = catalog.group_gift_for_gift(gift_id).await?;
    Ok(Json(GiftResponse {
        gift,
        availability,
        group_gift,
    }))
}

/// POST /gifts/{id}/reservations
#[tracing::instrument(skip(state, req))]
pub async fn reserve<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(gift_id): Path<GiftId>,
    Json(req): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<ReservationReceipt>), ApiError> {
    let hold_secs = req.hold_secs.unwrap_or(DEFAULT_HOLD_SECS);
    let hold = Duration::try_seconds(hold_secs)
        .ok_or_else(|| ApiError::BadRequest(format!("hold_secs out of range: {hold_secs}")))?;
    let receipt = state
        .registry
        .reservations()
        .reserve(gift_id, req.user_id, req.quantity, hold)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /gifts/{id}/group-gift
#[tracing::instrument(skip(state, req))]
pub async fn open_group_gift<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(gift_id): Path<GiftId>,
    Json(req): Json<OpenGroupGiftRequest>,
) -> Result<(StatusCode, Json<GroupGift>), ApiError> {
    let campaign = state
        .registry
        .catalog()
        .open_group_gift(
            gift_id,
            Money::from_cents(req.target_cents),
            Money::from_cents(req.min_contribution_cents),
            req.expiry_date,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}
