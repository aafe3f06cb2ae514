use axum::{
    Json,
    extract::rejection::{FormRejection, JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Request expired: {0}")]
    RequestExpired(String),

    #[error("Missing claim: {0}")]
    MissingClaim(&'static str),

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Unknown contribution: {0}")]
    UnknownContribution(String),

    #[error("Transaction conflict: contribution {uuid} already has transaction {existing}, got {incoming}")]
    TransactionConflict {
        uuid: String,
        existing: String,
        incoming: String,
    },

    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Buyer lookup failed: {0}")]
    BuyerLookupFailed(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the processor should re-deliver the notice later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::BuyerLookupFailed(_) | AppError::DeadlineExceeded(_)
        )
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Turn a missing row into a 404.
pub trait OptionExt<T> {
    fn or_not_found(self, what: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, what: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(what.to_string()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::MalformedToken(_)
            | AppError::InvalidSignature
            | AppError::UnsupportedAlgorithm(_)
            | AppError::MissingClaim(_) => {
                tracing::warn!("Rejected token: {}", self);
                (StatusCode::BAD_REQUEST, "Invalid notice", None)
            }
            AppError::RequestExpired(_) => {
                tracing::warn!("Rejected token: {}", self);
                (StatusCode::BAD_REQUEST, "Request expired", None)
            }
            AppError::UnknownProduct(_) | AppError::UnknownContribution(_) => {
                tracing::error!("{}", self);
                (StatusCode::NOT_FOUND, "Not found", None)
            }
            AppError::TransactionConflict { .. } | AppError::IllegalTransition(_) => {
                tracing::error!("{}", self);
                (StatusCode::CONFLICT, "Conflict", None)
            }
            AppError::BuyerLookupFailed(_) | AppError::DeadlineExceeded(_) => {
                tracing::error!("{}", self);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Temporarily unavailable",
                    None,
                )
            }
            AppError::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
