//! HTTP command surface for the gift registry engine.
//!
//! Exposes the reservation, funding and transaction commands as JSON
//! endpoints, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ledger_store::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use registry::{Registry, RegistryConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LedgerStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/lists", post(routes::lists::create::<S>))
        .route("/lists/{id}/gifts", post(routes::lists::add_gift::<S>))
        .route("/lists/{id}/transactions", get(routes::lists::transactions::<S>))
        .route("/gifts/{id}", get(routes::gifts::get::<S>))
        .route("/gifts/{id}/reservations", post(routes::gifts::reserve::<S>))
        .route("/gifts/{id}/group-gift", post(routes::gifts::open_group_gift::<S>))
        .route("/reservations/{id}", get(routes::reservations::get::<S>))
        .route("/reservations/{id}/confirm", post(routes::reservations::confirm::<S>))
        .route("/reservations/{id}/cancel", post(routes::reservations::cancel::<S>))
        .route("/group-gifts/{id}", get(routes::group_gifts::get::<S>))
        .route(
            "/group-gifts/{id}/contributions",
            post(routes::group_gifts::contribute::<S>),
        )
        .route("/contributions/{id}/settle", post(routes::group_gifts::settle::<S>))
        .route("/transactions/{id}", get(routes::transactions::get::<S>))
        .route("/transactions/{id}/settle", post(routes::transactions::settle::<S>))
        .route("/transactions/{id}/thank-you", post(routes::transactions::thank_you::<S>))
        .route("/thank-you-notes/{id}/sent", post(routes::transactions::note_sent::<S>))
        .route("/sweep", post(routes::sweep::run::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over `store` with the system clock and a
/// logging notification emitter.
pub fn create_default_state<S: LedgerStore + Clone + 'static>(
    store: S,
    config: &RegistryConfig,
) -> Arc<AppState<S>> {
    Arc::new(AppState::new(Registry::new(store, config)))
}
