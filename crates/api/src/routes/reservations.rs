//! Reservation lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{ReservationId, UserId};
use ledger_store::{LedgerStore, Reservation};
use registry::Actor;
use serde::Deserialize;

use super::{AppState, OutcomeRequest};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub admin: bool,
}

impl CancelRequest {
    fn actor(&self) -> Actor {
        if self.admin {
            Actor::Admin(self.user_id)
        } else {
            Actor::User(self.user_id)
        }
    }
}

/// GET /reservations/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(reservation_id): Path<ReservationId>,
) -> Result<Json<Reservation>, ApiError> {
    Ok(Json(state.registry.reservations().get(reservation_id).await?))
}

/// POST /reservations/{id}/confirm
#[tracing::instrument(skip(state))]
pub async fn confirm<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(reservation_id): Path<ReservationId>,
    Json(req): Json<OutcomeRequest>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation = state
        .registry
        .reservations()
        .confirm(reservation_id, req.outcome)
        .await?;
    Ok(Json(reservation))
}

/// POST /reservations/{id}/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(reservation_id): Path<ReservationId>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation = state
        .registry
        .reservations()
        .cancel(reservation_id, req.actor())
        .await?;
    Ok(Json(reservation))
}
