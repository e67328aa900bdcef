use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::{store_id, user_id};
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AdjustStockRequest {
    /// Signed quantity change; negative decrements.
    pub delta: i32,
    #[validate(length(min = 1, max = 255, message = "a reason is required"))]
    pub reason: String,
}

pub fn stock_router() -> Router<AppState> {
    Router::new().route("/:product_id/adjustments", post(adjust_stock))
}

#[utoipa::path(
    post,
    path = "/api/v1/stock/{product_id}/adjustments",
    request_body = AdjustStockRequest,
    responses(
        (status = 200, description = "Stock adjusted, movement recorded"),
        (status = 422, description = "Adjustment would drive stock negative", body = crate::errors::ErrorResponse),
    ),
    tag = "stock"
)]
async fn adjust_stock(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<AdjustStockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let store = store_id(&headers)?;
    let user = user_id(&headers)?;
    let adjustment = state
        .services
        .stock
        .adjust_stock_atomic(store, product_id, payload.delta, &payload.reason, Some(user))
        .await?;
    Ok(Json(ApiResponse::success(adjustment)))
}
