use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use utoipa::ToSchema;

/// Error envelope returned by every HTTP endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Order with reference sess_01HX not found",
    "details": null,
    "timestamp": "2025-06-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional details (per-field validation messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Customer fields or required custom answers missing/invalid. Recoverable
    /// locally; checkout never reaches a network call with one of these.
    #[error("Validation failed")]
    ValidationError(HashMap<String, String>),

    /// The selected payment provider lacks required credentials or identifiers.
    /// Fatal for the attempt: the pay action is blocked before any remote call.
    #[error("Payment provider configuration error: {0}")]
    ConfigurationError(String),

    /// Provider scripts failed to load or never became ready after bounded
    /// retries. A system-level error, distinct from a declined payment.
    #[error("Payment system failed to load: {0}")]
    ScriptLoadError(String),

    /// Payment explicitly rejected by the provider. Retrying with a brand-new
    /// session is the supported recovery.
    #[error("Payment declined: {0}")]
    ProviderDeclined(String),

    /// Payment captured but order creation failed. Must never be presented as
    /// a failed payment; re-attempting payment would double-charge.
    #[error("Payment processed, order confirmation pending: {0}")]
    FinalizationError(String),

    /// Landed on a return page without a resolvable order reference.
    #[error("No identifiable order")]
    IdentificationError,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        let fields = err
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let message = errors
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("{} is invalid", field));
                (field.to_string(), message)
            })
            .collect();
        ServiceError::ValidationError(fields)
    }
}

impl ServiceError {
    /// Convenience constructor for a single-field validation failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.into(), message.into());
        ServiceError::ValidationError(errors)
    }

    /// Returns the HTTP status code for this error.
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) | Self::IdentificationError => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidOperation(_)
            | Self::InvalidInput(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ConfigurationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ProviderDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            // The payment went through; the order record is what is pending.
            Self::FinalizationError(_) => StatusCode::ACCEPTED,
            Self::ScriptLoadError(_) | Self::ExternalApiError(_) => StatusCode::BAD_GATEWAY,
            Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message suitable for HTTP responses. Internal errors get a
    /// generic message to avoid leaking implementation details; checkout
    /// errors keep their user-facing wording.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            Self::ValidationError(_) => "Validation failed".to_string(),
            Self::FinalizationError(_) => {
                "Payment processed; order confirmation pending. Please contact support and do not pay again.".to_string()
            }
            Self::IdentificationError => "No identifiable order".to_string(),
            _ => self.to_string(),
        }
    }

    /// Per-field details for validation failures, `None` otherwise.
    fn details(&self) -> Option<HashMap<String, String>> {
        match self {
            Self::ValidationError(fields) => Some(fields.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}
