use std::sync::Arc;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::{
        packing::PackingService, picking::PickingService, reaper::SessionReaper,
        sessions::SessionService, stock::StockLedgerService,
    },
};

pub mod health;
pub mod stock;
pub mod warehouse;

/// Service container shared by all handlers through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub sessions: Arc<SessionService>,
    pub picking: Arc<PickingService>,
    pub packing: Arc<PackingService>,
    pub stock: Arc<StockLedgerService>,
    pub reaper: Arc<SessionReaper>,
}

/// Tenant surrogate resolved by the auth middleware in front of this
/// service; until it lands in this repo the store arrives as a header.
pub(crate) fn store_id(headers: &HeaderMap) -> Result<Uuid, ServiceError> {
    header_uuid(headers, "x-store-id")
}

pub(crate) fn user_id(headers: &HeaderMap) -> Result<Uuid, ServiceError> {
    header_uuid(headers, "x-user-id")
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Uuid, ServiceError> {
    let raw = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::ValidationError(format!("missing {} header", name)))?;
    raw.parse()
        .map_err(|_| ServiceError::ValidationError(format!("{} header is not a valid UUID", name)))
}
