use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::payment_gateway::GatewayError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Simplified error structure for OpenAPI documentation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Order 550e8400-e29b-41d4-a716-446655440000 not found",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request", "Internal Server Error")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Itemized validation messages, when there are several
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    /// Set when repeating the same request may succeed (timeouts, lost write races)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Itemized input problems collected before any side effect.
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Invalid line item: {0}")]
    InvalidLineItem(String),

    #[error("Payment reference does not match this order")]
    PaymentRefMismatch,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Payment gateway timed out: {0}")]
    GatewayTimeout(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::GatewayError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) | Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::Validation(_)
            | Self::InvalidLineItem(_)
            | Self::PaymentRefMismatch
            | Self::InvalidSignature => StatusCode::BAD_REQUEST,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ConcurrentModification(_) | Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }

    /// Individual messages for the `errors` array of workflow responses.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Validation(messages) => messages.clone(),
            other => vec![other.response_message()],
        }
    }

    /// Gateway timeouts and lost optimistic races leave the order untouched, so
    /// the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayTimeout(_) | Self::ConcurrentModification(_)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            Self::Validation(_) => self.messages(),
            _ => Vec::new(),
        };

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details,
            retryable: self.is_retryable(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// Failure body of the order workflow endpoints; the counterpart of their
/// `{success: true, ...}` responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "success": false,
    "errors": ["Customer email is required", "At least one line item is required"],
    "request_id": "req-abc123xyz"
}))]
pub struct WorkflowFailureResponse {
    pub success: bool,
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// A [`ServiceError`] rendered as a [`WorkflowFailureResponse`], same status code.
#[derive(Debug)]
pub struct WorkflowError(pub ServiceError);

impl From<ServiceError> for WorkflowError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let body = WorkflowFailureResponse {
            success: false,
            errors: self.0.messages(),
            retryable: self.0.is_retryable(),
            request_id: current_request_id(),
        };

        (self.0.status_code(), Json(body)).into_response()
    }
}
