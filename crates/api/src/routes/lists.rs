//! Gift list endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{GiftListId, UserId};
use ledger_store::{Currency, Gift, GiftList, LedgerStore, Money, Transaction, Visibility};
use registry::NewGift;
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateListRequest {
    pub owner_id: UserId,
    pub title: String,
    #[serde(default)]
    pub visibility: Visibility,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AddGiftRequest {
    pub owner_id: UserId,
    pub name: String,
    pub price_cents: i64,
    pub currency: Currency,
    pub stock: u32,
    #[serde(default)]
    pub is_group_gift: bool,
}

/// POST /lists
#[tracing::instrument(skip(state, req))]
pub async fn create<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateListRequest>,
) -> Result<(StatusCode, Json<GiftList>), ApiError> {
    let list = state
        .registry
        .catalog()
        .create_gift_list(req.owner_id, &req.title, req.visibility, req.expires_at)
        .await?;
    Ok((StatusCode::CREATED, Json(list)))
}

/// POST /lists/{id}/gifts
#[tracing::instrument(skip(state, req))]
pub async fn add_gift<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(list_id): Path<GiftListId>,
    Json(req): Json<AddGiftRequest>,
) -> Result<(StatusCode, Json<Gift>), ApiError> {
    let gift = NewGift {
        name: req.name,
        price: Money::from_cents(req.price_cents),
        currency: req.currency,
        stock: req.stock,
        is_group_gift: req.is_group_gift,
    };
    let gift = state
        .registry
        .catalog()
        .add_gift(list_id, req.owner_id, gift)
        .await?;
    Ok((StatusCode::CREATED, Json(gift)))
}

/// GET /lists/{id}/transactions
#[tracing::instrument(skip(state))]
pub async fn transactions<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(list_id): Path<GiftListId>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    // NotFound for an unknown list rather than an empty page
    state.registry.catalog().gift_list(list_id).await?;
    let transactions = state
        .registry
        .transactions()
        .transactions_for_list(list_id)
        .await?;
    Ok(Json(transactions))
}
