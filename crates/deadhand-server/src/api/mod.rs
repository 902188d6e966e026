//! HTTP API over the beneficiary index
//!
//! Write endpoints mirror ledger events a client has already had confirmed;
//! read endpoints serve the expiry-annotated views.

pub mod routes;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use deadhand_core::{Clock, ValidationError};
use deadhand_index::{QueryError, QuerySurface, StoreError};
use deadhand_ledger::LedgerError;
use deadhand_reconcile::{DiscardReason, ReconcileError, Reconciler};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Reconciler>,
    pub query: Arc<QuerySurface>,
    pub clock: Arc<dyn Clock>,
    /// Include internal error detail in responses
    pub debug: bool,
}

/// Create the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/beneficiaries",
            get(routes::list_beneficiaries)
                .post(routes::add_beneficiary)
                .put(routes::check_in)
                .delete(routes::remove_beneficiaries),
        )
        .route(
            "/api/claimlist",
            get(routes::claim_list).delete(routes::claim),
        )
        .route("/health", get(routes::health))
        .with_state(state)
}

/// Error response: `{ success: false, error, kind, detail? }`
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    /// Internal cause; only sent when the server runs with `debug`
    pub detail: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            detail: None,
        }
    }

    fn internal(kind: &'static str, detail: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind,
            message: "Internal server error".to_string(),
            detail: Some(detail),
        }
    }

    pub fn not_found(message: &str, reason: DiscardReason) -> Self {
        let kind = match reason {
            DiscardReason::WalletClosed => "wallet_closed",
            DiscardReason::NoRecord => "not_found",
            DiscardReason::NotOnLedger => "not_on_ledger",
            DiscardReason::OwnerMismatch => "owner_mismatch",
        };
        Self {
            status: StatusCode::NOT_FOUND,
            kind,
            message: message.to_string(),
            detail: Some(reason.to_string()),
        }
    }

    /// Drop internal detail unless debugging.
    pub fn redact(mut self, debug: bool) -> Self {
        if !debug {
            self.detail = None;
        }
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!(
                "{} {}: {}",
                self.status,
                self.kind,
                self.detail.as_deref().unwrap_or(&self.message)
            );
        }
        let body = ErrorBody {
            success: false,
            error: &self.message,
            kind: self.kind,
            detail: self.detail.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        let message = match &e {
            ValidationError::MissingField(_) => "Missing required fields".to_string(),
            ValidationError::NonPositiveDuration | ValidationError::UnsupportedUnit(_) => {
                format!("Invalid inactivity period: {}", e)
            }
            _ => e.to_string(),
        };
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation",
            message,
            detail: Some(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text())
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        Self::internal("index_unavailable", e.to_string())
    }
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        let kind = e.kind();
        match &e {
            ReconcileError::Store(StoreError::Invalid(v)) => v.clone().into(),
            ReconcileError::Store(StoreError::Duplicate(_))
            | ReconcileError::Store(StoreError::WalletClosed { .. }) => {
                Self::new(StatusCode::CONFLICT, kind, e.to_string())
            }
            ReconcileError::Store(StoreError::NotFound(_)) => {
                Self::new(StatusCode::NOT_FOUND, kind, e.to_string())
            }
            ReconcileError::Store(_) | ReconcileError::Outbox { .. } => {
                Self::internal(kind, e.to_string())
            }
            ReconcileError::Ledger(LedgerError::Indeterminate { .. }) => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, kind, e.to_string())
            }
            ReconcileError::Ledger(_) => Self::new(StatusCode::BAD_GATEWAY, kind, e.to_string()),
            ReconcileError::Queued { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, kind, e.to_string())
            }
        }
    }
}

/// Turn a handler result into a response, honoring the debug flag.
pub fn reply<T: Serialize>(state: &AppState, result: Result<T, ApiError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.redact(state.debug).into_response(),
    }
}
