//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ledger_store::LedgerError;
use registry::RegistryError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body or path could not be interpreted.
    #[error("{0}")]
    BadRequest(String),
    /// Engine error, surfaced with its own message and code.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Registry(err) => registry_status(err),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Registry(err) => err.code(),
        }
    }
}

fn registry_status(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
        RegistryError::InsufficientStock { .. }
        | RegistryError::CampaignNotActive { .. }
        | RegistryError::AlreadyTerminal { .. }
        | RegistryError::ManagedTransaction { .. }
        | RegistryError::CampaignExists { .. }
        | RegistryError::NotSettled { .. }
        | RegistryError::Contention { .. } => StatusCode::CONFLICT,
        RegistryError::BelowMinimum { .. }
        | RegistryError::InvalidQuantity { .. }
        | RegistryError::InvalidAmount { .. }
        | RegistryError::NotReservable { .. }
        | RegistryError::NotGroupGift { .. } => StatusCode::BAD_REQUEST,
        RegistryError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::NotOwner { .. } => StatusCode::FORBIDDEN,
        RegistryError::Store(LedgerError::ConcurrencyConflict { .. }) => StatusCode::CONFLICT,
        RegistryError::Store(LedgerError::NotFound { .. }) => StatusCode::NOT_FOUND,
        RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidData(msg) => ApiError::BadRequest(msg),
            other => ApiError::Registry(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::counter!("api_errors_total", "code" => self.code()).increment(1);
        if status.is_server_error() {
            tracing::error!(error = %self, "internal server error");
        }

        let body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        (status, axum::Json(body)).into_response()
    }
}
