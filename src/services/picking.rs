use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::{
        pick_list_entry, product,
        warehouse_session::SessionStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::sessions::find_session,
};

/// One pick list row joined with product identity.
#[derive(Debug, Clone, Serialize)]
pub struct PickingListItem {
    pub product_id: Uuid,
    pub name: String,
    pub sku: String,
    pub quantity_required: i32,
    pub quantity_picked: i32,
    pub complete: bool,
}

#[derive(Clone)]
pub struct PickingService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl PickingService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// The aggregated pick list for a session, in pick-path (name) order.
    #[instrument(skip(self))]
    pub async fn get_picking_list(
        &self,
        session_id: Uuid,
        store_id: Uuid,
    ) -> Result<Vec<PickingListItem>, ServiceError> {
        let db = self.db.as_ref();
        find_session(db, session_id, store_id).await?;

        let entries = pick_list_entry::Entity::find()
            .filter(pick_list_entry::Column::SessionId.eq(session_id))
            .all(db)
            .await?;

        let product_ids: Vec<Uuid> = entries.iter().map(|e| e.product_id).collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut list: Vec<PickingListItem> = entries
            .iter()
            .map(|entry| {
                let (name, sku) = products
                    .get(&entry.product_id)
                    .map(|p| (p.name.clone(), p.sku.clone()))
                    .unwrap_or_default();
                PickingListItem {
                    product_id: entry.product_id,
                    name,
                    sku,
                    quantity_required: entry.quantity_required,
                    quantity_picked: entry.quantity_picked,
                    complete: entry.is_complete(),
                }
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    /// Records the picked quantity for a product as an absolute count, not a
    /// delta: pickers recount the pile, so the API models the observed count
    /// and repeated submissions cannot compound.
    ///
    /// Completed or abandoned sessions fail with `SessionTerminal`; only an
    /// active session outside picking fails with `SessionNotInPicking`.
    /// Both map to 409.
    #[instrument(skip(self))]
    pub async fn update_picking_progress(
        &self,
        session_id: Uuid,
        store_id: Uuid,
        product_id: Uuid,
        quantity_picked: i32,
    ) -> Result<PickingListItem, ServiceError> {
        if quantity_picked < 0 {
            return Err(ServiceError::ValidationError(
                "picked quantity cannot be negative".into(),
            ));
        }

        let txn = self.db.begin().await?;
        let session = find_session(&txn, session_id, store_id).await?;
        match session.status {
            SessionStatus::Picking => {}
            s if s.is_terminal() => return Err(ServiceError::SessionTerminal(session_id)),
            _ => return Err(ServiceError::SessionNotInPicking(session_id)),
        }

        let entry = pick_list_entry::Entity::find()
            .filter(pick_list_entry::Column::SessionId.eq(session_id))
            .filter(pick_list_entry::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "product {} is not on the pick list for session {}",
                    product_id, session_id
                ))
            })?;

        if quantity_picked > entry.quantity_required {
            return Err(ServiceError::ValidationError(format!(
                "picked quantity {} exceeds required quantity {}",
                quantity_picked, entry.quantity_required
            )));
        }

        let prod = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::ProductNotFound(product_id))?;
        if quantity_picked > prod.stock_on_hand {
            return Err(ServiceError::InsufficientStock {
                product: prod.name,
                available: prod.stock_on_hand,
                requested: quantity_picked,
            });
        }

        let now = Utc::now();
        let mut active: pick_list_entry::ActiveModel = entry.clone().into();
        active.quantity_picked = Set(quantity_picked);
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        let mut active_session: crate::entities::warehouse_session::ActiveModel = session.into();
        active_session.last_activity_at = Set(now);
        active_session.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .emit(Event::PickingProgress {
                session_id,
                product_id,
                quantity_picked,
            })
            .await;

        Ok(PickingListItem {
            product_id,
            name: prod.name,
            sku: prod.sku,
            quantity_required: updated.quantity_required,
            quantity_picked: updated.quantity_picked,
            complete: updated.is_complete(),
        })
    }
}
