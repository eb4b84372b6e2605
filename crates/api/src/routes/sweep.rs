//! On-demand expiry pass.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use ledger_store::LedgerStore;
use registry::SweepReport;

use super::AppState;
use crate::error::ApiError;

/// POST /sweep: runs one pass immediately, alongside the background sweeper.
#[tracing::instrument(skip(state))]
pub async fn run<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(state.registry.sweep_expired().await?))
}
