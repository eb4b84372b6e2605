//! HTTP handlers, one module per resource.

pub mod gifts;
pub mod group_gifts;
pub mod health;
pub mod lists;
pub mod metrics;
pub mod reservations;
pub mod sweep;
pub mod transactions;

use ledger_store::{LedgerStore, Outcome};
use registry::Registry;
use serde::Deserialize;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub registry: Registry<S>,
}

impl<S: LedgerStore + Clone> AppState<S> {
    pub fn new(registry: Registry<S>) -> Self {
        Self { registry }
    }
}

/// Body of every settle/confirm endpoint.
#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub outcome: Outcome,
}
