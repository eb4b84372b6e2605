//! Transaction settlement and thank-you notes.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{ThankYouNoteId, TransactionId, UserId};
use ledger_store::{LedgerStore, ThankYouNote, Transaction};
use serde::Deserialize;

use super::{AppState, OutcomeRequest};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ThankYouRequest {
    pub author_id: UserId,
    pub message: String,
}

/// GET /transactions/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(transaction_id): Path<TransactionId>,
) -> Result<Json<Transaction>, ApiError> {
    Ok(Json(state.registry.transactions().get(transaction_id).await?))
}

/// POST /transactions/{id}/settle, routed to the component owning it.
#[tracing::instrument(skip(state))]
pub async fn settle<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(transaction_id): Path<TransactionId>,
    Json(req): Json<OutcomeRequest>,
) -> Result<Json<Transaction>, ApiError> {
    let transaction = state
        .registry
        .settle_transaction(transaction_id, req.outcome)
        .await?;
    Ok(Json(transaction))
}

/// POST /transactions/{id}/thank-you
#[tracing::instrument(skip(state, req))]
pub async fn thank_you<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(transaction_id): Path<TransactionId>,
    Json(req): Json<ThankYouRequest>,
) -> Result<(StatusCode, Json<ThankYouNote>), ApiError> {
    let note = state
        .registry
        .transactions()
        .write_thank_you_note(transaction_id, req.author_id, &req.message)
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// POST /thank-you-notes/{id}/sent
#[tracing::instrument(skip(state))]
pub async fn note_sent<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(note_id): Path<ThankYouNoteId>,
) -> Result<Json<ThankYouNote>, ApiError> {
    Ok(Json(state.registry.transactions().mark_note_sent(note_id).await?))
}
