use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by every failing route.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Conflict", "Unprocessable Entity")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Correlation id for support on internal errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No orders selected")]
    EmptySelection,

    #[error("Invalid order state: {0}")]
    InvalidOrderState(String),

    #[error("Session {0} is not in picking")]
    SessionNotInPicking(Uuid),

    #[error("Session {0} is not in packing")]
    SessionNotInPacking(Uuid),

    #[error("Picking incomplete: {remaining} product(s) below required quantity")]
    PickingIncomplete { remaining: usize },

    #[error("Packing incomplete: {unpacked_orders} order(s) not fully packed")]
    PackingIncomplete { unpacked_orders: usize },

    #[error("Session {0} is already in a terminal state")]
    AlreadyTerminal(Uuid),

    #[error("Session {0} is completed or abandoned")]
    SessionTerminal(Uuid),

    #[error("Order {order_id} is not part of session {session_id}")]
    OrderNotInSession { session_id: Uuid, order_id: Uuid },

    #[error("Order {order_id} needs no more units of product {product_id}")]
    OrderNotEligible { order_id: Uuid, product_id: Uuid },

    #[error("Insufficient stock for {product}: {available} available, {requested} requested")]
    InsufficientStock {
        product: String,
        available: i32,
        requested: i32,
    },

    #[error("No picked units left in the pool for product {product_id}")]
    NoUnitsAvailable { product_id: Uuid },

    #[error("Stock decrement failed for product {product_id}: {detail}")]
    StockDecrementFailed { product_id: Uuid, detail: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::SessionNotFound(_) | Self::ProductNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::ValidationError(_) | Self::EmptySelection => StatusCode::BAD_REQUEST,
            Self::InvalidOrderState(_)
            | Self::SessionNotInPicking(_)
            | Self::SessionNotInPacking(_)
            | Self::PickingIncomplete { .. }
            | Self::PackingIncomplete { .. }
            | Self::AlreadyTerminal(_)
            | Self::SessionTerminal(_)
            | Self::OrderNotInSession { .. }
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InsufficientStock { .. }
            | Self::NoUnitsAvailable { .. }
            | Self::OrderNotEligible { .. }
            | Self::StockDecrementFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message suitable for HTTP responses. Internal errors return a generic
    /// message so implementation details stay in the logs.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Resource-exhaustion outcomes are expected during normal operation and
    /// are not logged as system errors.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::InsufficientStock { .. }
                | Self::NoUnitsAvailable { .. }
                | Self::OrderNotEligible { .. }
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = if status.is_server_error() {
            let rid = Uuid::new_v4().to_string();
            tracing::error!(request_id = %rid, error = %self, "request failed");
            Some(rid)
        } else {
            if !self.is_expected() {
                tracing::debug!(error = %self, "request rejected");
            }
            None
        };

        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            message: self.response_message(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
