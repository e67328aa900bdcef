use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::{store_id, user_id};
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateSessionRequest {
    /// Confirmed, unclaimed orders to batch into this session.
    #[validate(length(min = 1, message = "at least one order is required"))]
    pub order_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdatePickingRequest {
    /// Absolute picked count for the product, as recounted by the picker.
    #[validate(range(min = 0, message = "picked quantity cannot be negative"))]
    pub quantity_picked: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClaimPackUnitRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AbandonSessionRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CleanupRequest {
    pub hours_inactive: Option<i64>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct StaleQuery {
    pub hours_inactive: Option<i64>,
}

/// Routes for the warehouse session state machine, nested under
/// `/api/v1/warehouse/sessions`.
pub fn warehouse_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/stale", get(stale_sessions))
        .route("/cleanup", post(cleanup_expired))
        .route("/:id", get(get_session))
        .route("/:id/picking", get(picking_list))
        .route("/:id/picking/:product_id", put(update_picking))
        .route("/:id/finish-picking", post(finish_picking))
        .route("/:id/packing", get(packing_list))
        .route("/:id/packing/claim", post(claim_pack_unit))
        .route("/:id/complete", post(complete_session))
        .route("/:id/abandon", post(abandon_session))
        .route("/:id/orders/:order_id", delete(remove_order))
}

#[utoipa::path(
    post,
    path = "/api/v1/warehouse/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created in picking"),
        (status = 409, description = "An order is not confirmed or already claimed", body = crate::errors::ErrorResponse),
    ),
    tag = "warehouse"
)]
async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let store = store_id(&headers)?;
    let user = user_id(&headers)?;
    let session = state
        .services
        .sessions
        .create_session(store, payload.order_ids, user)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = store_id(&headers)?;
    let session = state.services.sessions.get_session(id, store).await?;
    Ok(Json(ApiResponse::success(session)))
}

async fn picking_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = store_id(&headers)?;
    let list = state.services.picking.get_picking_list(id, store).await?;
    Ok(Json(ApiResponse::success(list)))
}

#[utoipa::path(
    put,
    path = "/api/v1/warehouse/sessions/{id}/picking/{product_id}",
    request_body = UpdatePickingRequest,
    responses(
        (status = 200, description = "Picked quantity recorded"),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    tag = "warehouse"
)]
async fn update_picking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, product_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdatePickingRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let store = store_id(&headers)?;
    let item = state
        .services
        .picking
        .update_picking_progress(id, store, product_id, payload.quantity_picked)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

async fn finish_picking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = store_id(&headers)?;
    let session = state.services.sessions.finish_picking(id, store).await?;
    Ok(Json(ApiResponse::success(session)))
}

async fn packing_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = store_id(&headers)?;
    let list = state.services.packing.get_packing_list(id, store).await?;
    Ok(Json(ApiResponse::success(list)))
}

#[utoipa::path(
    post,
    path = "/api/v1/warehouse/sessions/{id}/packing/claim",
    request_body = ClaimPackUnitRequest,
    responses(
        (status = 200, description = "One unit assigned to the order"),
        (status = 422, description = "No picked units left in the pool", body = crate::errors::ErrorResponse),
        (status = 409, description = "Claim kept conflicting after retries", body = crate::errors::ErrorResponse),
    ),
    tag = "warehouse"
)]
async fn claim_pack_unit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClaimPackUnitRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = store_id(&headers)?;
    let claim = state
        .services
        .packing
        .claim_pack_unit(id, store, payload.order_id, payload.product_id)
        .await?;
    Ok(Json(ApiResponse::success(claim)))
}

async fn complete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = store_id(&headers)?;
    let session = state.services.sessions.complete_session(id, store).await?;
    Ok(Json(ApiResponse::success(session)))
}

async fn abandon_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<AbandonSessionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = store_id(&headers)?;
    let user = user_id(&headers)?;
    let outcome = state
        .services
        .sessions
        .abandon_session(id, store, user, payload.reason)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

async fn remove_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, order_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = store_id(&headers)?;
    let session = state
        .services
        .sessions
        .remove_order_from_session(id, order_id, store)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

async fn stale_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StaleQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let store = store_id(&headers)?;
    let hours = query
        .hours_inactive
        .unwrap_or(state.config.warehouse.stale_after_hours);
    let sessions = state
        .services
        .reaper
        .get_stale_sessions(store, hours)
        .await?;
    Ok(Json(ApiResponse::success(sessions)))
}

async fn cleanup_expired(
    State(state): State<AppState>,
    Json(payload): Json<CleanupRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let hours = payload
        .hours_inactive
        .unwrap_or(state.config.warehouse.stale_after_hours);
    let report = state
        .services
        .reaper
        .cleanup_expired_sessions(hours)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}
