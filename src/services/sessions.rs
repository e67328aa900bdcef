use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, OrderStatus},
        order_item, pack_assignment, pick_list_entry,
        warehouse_session::{self, SessionStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock::StockLedgerService,
};

/// Session state plus the orders it currently covers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub store_id: Uuid,
    pub status: String,
    pub created_by: Uuid,
    pub abandon_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub order_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbandonOutcome {
    pub session_id: Uuid,
    pub orders_restored: Vec<Uuid>,
}

/// Orchestrates the session state machine:
/// `create → picking → packing → completed`, with abandonment from either
/// active state. Every transition runs in one transaction so a failure
/// midway leaves nothing visibly committed.
#[derive(Clone)]
pub struct SessionService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl SessionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Claims the given confirmed, unclaimed orders for a new session and
    /// aggregates their line items into the pick list.
    #[instrument(skip(self, order_ids), fields(store_id = %store_id, orders = order_ids.len()))]
    pub async fn create_session(
        &self,
        store_id: Uuid,
        order_ids: Vec<Uuid>,
        user_id: Uuid,
    ) -> Result<SessionView, ServiceError> {
        let mut order_ids = order_ids;
        order_ids.sort_unstable();
        order_ids.dedup();
        if order_ids.is_empty() {
            return Err(ServiceError::EmptySelection);
        }

        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let txn = self.db.begin().await?;

        // The claim: every order must be confirmed, belong to the store, and
        // be unclaimed. The conditional update takes all claims atomically,
        // so a concurrent create racing for the same order misses here.
        let claimed = order::Entity::update_many()
            .col_expr(order::Column::SessionId, Expr::value(session_id))
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Picking))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.is_in(order_ids.clone()))
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::Status.eq(OrderStatus::Confirmed))
            .filter(order::Column::SessionId.is_null())
            .exec(&txn)
            .await?;
        if claimed.rows_affected != order_ids.len() as u64 {
            return Err(ServiceError::InvalidOrderState(format!(
                "claimed {} of {} orders; the rest are missing, not confirmed, or already in a session",
                claimed.rows_affected,
                order_ids.len()
            )));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids.clone()))
            .all(&txn)
            .await?;
        let totals = aggregate_line_items(items.iter().map(|i| (i.product_id, i.quantity)));
        if totals.is_empty() {
            return Err(ServiceError::ValidationError(
                "selected orders have no line items".into(),
            ));
        }

        let entries: Vec<pick_list_entry::ActiveModel> = totals
            .iter()
            .map(|(&product_id, &quantity)| pick_list_entry::ActiveModel {
                id: Set(Uuid::new_v4()),
                session_id: Set(session_id),
                product_id: Set(product_id),
                quantity_required: Set(quantity),
                quantity_picked: Set(0),
                units_assigned: Set(0),
                updated_at: Set(now),
            })
            .collect();
        pick_list_entry::Entity::insert_many(entries).exec(&txn).await?;

        let session = warehouse_session::ActiveModel {
            id: Set(session_id),
            store_id: Set(store_id),
            status: Set(SessionStatus::Picking),
            created_by: Set(user_id),
            abandon_reason: Set(None),
            created_at: Set(now),
            last_activity_at: Set(now),
            completed_at: Set(None),
        };
        let session = session.insert(&txn).await?;
        txn.commit().await?;

        info!(session_id = %session_id, orders = order_ids.len(), "warehouse session created");
        self.event_sender
            .emit(Event::SessionCreated {
                session_id,
                store_id,
                order_count: order_ids.len(),
            })
            .await;

        Ok(SessionView {
            order_ids,
            ..view_without_orders(&session)
        })
    }

    #[instrument(skip(self))]
    pub async fn get_session(
        &self,
        session_id: Uuid,
        store_id: Uuid,
    ) -> Result<SessionView, ServiceError> {
        let session = find_session(self.db.as_ref(), session_id, store_id).await?;
        self.view(&session).await
    }

    /// Closes the picking phase. Every pick list entry must be complete;
    /// pack assignments are materialized zero-initialized for each
    /// (order, product) pair in scope.
    #[instrument(skip(self))]
    pub async fn finish_picking(
        &self,
        session_id: Uuid,
        store_id: Uuid,
    ) -> Result<SessionView, ServiceError> {
        let txn = self.db.begin().await?;
        let session = find_session(&txn, session_id, store_id).await?;
        match session.status {
            SessionStatus::Picking => {}
            s if s.is_terminal() => return Err(ServiceError::SessionTerminal(session_id)),
            _ => return Err(ServiceError::SessionNotInPicking(session_id)),
        }

        let entries = pick_list_entry::Entity::find()
            .filter(pick_list_entry::Column::SessionId.eq(session_id))
            .all(&txn)
            .await?;
        let remaining = entries.iter().filter(|e| !e.is_complete()).count();
        if remaining > 0 {
            return Err(ServiceError::PickingIncomplete { remaining });
        }

        let orders = order::Entity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .all(&txn)
            .await?;
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids.clone()))
            .all(&txn)
            .await?;

        let now = Utc::now();
        let assignments: Vec<pack_assignment::ActiveModel> = items
            .iter()
            .map(|item| pack_assignment::ActiveModel {
                id: Set(Uuid::new_v4()),
                session_id: Set(session_id),
                order_id: Set(item.order_id),
                product_id: Set(item.product_id),
                quantity_required: Set(item.quantity),
                quantity_packed: Set(0),
                updated_at: Set(now),
            })
            .collect();
        if !assignments.is_empty() {
            pack_assignment::Entity::insert_many(assignments)
                .exec(&txn)
                .await?;
        }

        order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Packing))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::SessionId.eq(session_id))
            .exec(&txn)
            .await?;

        let mut active: warehouse_session::ActiveModel = session.into();
        active.status = Set(SessionStatus::Packing);
        active.last_activity_at = Set(now);
        let session = active.update(&txn).await?;
        txn.commit().await?;

        info!(session_id = %session_id, "picking finished, session now packing");
        self.event_sender
            .emit(Event::PickingCompleted { session_id })
            .await;

        Ok(SessionView {
            order_ids,
            ..view_without_orders(&session)
        })
    }

    /// Completes a fully packed session: per product, decrements stock by
    /// the picked quantity (the physical pick cost, regardless of how it was
    /// allocated across orders) and logs a movement, then flips every order
    /// to ready-to-ship. All of it commits atomically or not at all.
    #[instrument(skip(self))]
    pub async fn complete_session(
        &self,
        session_id: Uuid,
        store_id: Uuid,
    ) -> Result<SessionView, ServiceError> {
        let txn = self.db.begin().await?;
        let session = find_session(&txn, session_id, store_id).await?;
        match session.status {
            SessionStatus::Packing => {}
            s if s.is_terminal() => return Err(ServiceError::AlreadyTerminal(session_id)),
            _ => return Err(ServiceError::SessionNotInPacking(session_id)),
        }

        let assignments = pack_assignment::Entity::find()
            .filter(pack_assignment::Column::SessionId.eq(session_id))
            .all(&txn)
            .await?;
        let mut unpacked: BTreeMap<Uuid, i32> = BTreeMap::new();
        for assignment in &assignments {
            *unpacked.entry(assignment.order_id).or_insert(0) += assignment.remaining();
        }
        let unpacked_orders = unpacked.values().filter(|&&r| r > 0).count();
        if unpacked_orders > 0 {
            return Err(ServiceError::PackingIncomplete { unpacked_orders });
        }

        let entries = pick_list_entry::Entity::find()
            .filter(pick_list_entry::Column::SessionId.eq(session_id))
            .all(&txn)
            .await?;
        for entry in &entries {
            if entry.quantity_picked == 0 {
                continue;
            }
            let unassigned = entry.quantity_picked - entry.units_assigned;
            let reason = if unassigned > 0 {
                format!("session complete; {} picked unit(s) unassigned", unassigned)
            } else {
                "session complete".to_string()
            };
            StockLedgerService::adjust_on(
                &txn,
                entry.product_id,
                -entry.quantity_picked,
                "session_complete",
                Some(&reason),
                Some((session_id, "warehouse_session")),
                None,
            )
            .await
            .map_err(|e| match e {
                ServiceError::InsufficientStock { .. } | ServiceError::Conflict(_) => {
                    ServiceError::StockDecrementFailed {
                        product_id: entry.product_id,
                        detail: e.to_string(),
                    }
                }
                other => other,
            })?;
        }

        let now = Utc::now();
        order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::ReadyToShip))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::SessionId.eq(session_id))
            .exec(&txn)
            .await?;

        let mut active: warehouse_session::ActiveModel = session.into();
        active.status = Set(SessionStatus::Completed);
        active.last_activity_at = Set(now);
        active.completed_at = Set(Some(now));
        let session = active.update(&txn).await?;
        txn.commit().await?;

        info!(session_id = %session_id, products = entries.len(), "warehouse session completed");
        self.event_sender
            .emit(Event::SessionCompleted {
                session_id,
                products: entries.len(),
            })
            .await;

        self.view(&session).await
    }

    /// Abandons an active session: restores every order to confirmed,
    /// releases the claims, and discards pick/pack progress. A second
    /// abandon reports `AlreadyTerminal` so double-submission is detectable.
    #[instrument(skip(self))]
    pub async fn abandon_session(
        &self,
        session_id: Uuid,
        store_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    ) -> Result<AbandonOutcome, ServiceError> {
        let reason = reason.unwrap_or_else(|| "abandoned".to_string());
        let txn = self.db.begin().await?;
        let session = find_session(&txn, session_id, store_id).await?;
        if session.status.is_terminal() {
            return Err(ServiceError::AlreadyTerminal(session_id));
        }

        let orders_restored = release_session_orders(&txn, session_id).await?;
        discard_session_progress(&txn, session_id).await?;

        let now = Utc::now();
        let mut active: warehouse_session::ActiveModel = session.into();
        active.status = Set(SessionStatus::Abandoned);
        active.abandon_reason = Set(Some(reason.clone()));
        active.last_activity_at = Set(now);
        active.update(&txn).await?;
        txn.commit().await?;

        info!(
            session_id = %session_id,
            user_id = %user_id,
            reason = %reason,
            restored = orders_restored.len(),
            "warehouse session abandoned"
        );
        self.event_sender
            .emit(Event::SessionAbandoned { session_id, reason })
            .await;

        Ok(AbandonOutcome {
            session_id,
            orders_restored,
        })
    }

    /// Detaches one order from an active session without abandoning the
    /// rest. The order returns to confirmed; its share of the pick list is
    /// recomputed and its packed units are returned to the pool. Removing
    /// the last order abandons the session.
    #[instrument(skip(self))]
    pub async fn remove_order_from_session(
        &self,
        session_id: Uuid,
        order_id: Uuid,
        store_id: Uuid,
    ) -> Result<SessionView, ServiceError> {
        let txn = self.db.begin().await?;
        let session = find_session(&txn, session_id, store_id).await?;
        if session.status.is_terminal() {
            return Err(ServiceError::SessionTerminal(session_id));
        }

        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::SessionId.eq(session_id))
            .one(&txn)
            .await?
            .ok_or(ServiceError::OrderNotInSession {
                session_id,
                order_id,
            })?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        let assignments = pack_assignment::Entity::find()
            .filter(pack_assignment::Column::SessionId.eq(session_id))
            .filter(pack_assignment::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        let packed_by_product: BTreeMap<Uuid, i32> =
            aggregate_line_items(assignments.iter().map(|a| (a.product_id, a.quantity_packed)));

        for item in &items {
            let entry = pick_list_entry::Entity::find()
                .filter(pick_list_entry::Column::SessionId.eq(session_id))
                .filter(pick_list_entry::Column::ProductId.eq(item.product_id))
                .one(&txn)
                .await?;
            let Some(entry) = entry else { continue };

            let new_required = entry.quantity_required - item.quantity;
            if new_required <= 0 && session.status == SessionStatus::Picking {
                pick_list_entry::Entity::delete_by_id(entry.id).exec(&txn).await?;
                continue;
            }

            let mut active: pick_list_entry::ActiveModel = entry.clone().into();
            active.quantity_required = Set(new_required.max(0));
            if session.status == SessionStatus::Picking {
                // Picked counts are still fluid; keep picked <= required.
                active.quantity_picked = Set(entry.quantity_picked.min(new_required.max(0)));
            } else {
                // Packing: the stock is physically picked. Leave the pool as
                // is and return this order's packed units to it.
                let voided = packed_by_product.get(&item.product_id).copied().unwrap_or(0);
                active.units_assigned = Set((entry.units_assigned - voided).max(0));
            }
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        pack_assignment::Entity::delete_many()
            .filter(pack_assignment::Column::SessionId.eq(session_id))
            .filter(pack_assignment::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;

        let now = Utc::now();
        let mut active_order: order::ActiveModel = order.into();
        active_order.status = Set(OrderStatus::Confirmed);
        active_order.session_id = Set(None);
        active_order.updated_at = Set(Some(now));
        active_order.update(&txn).await?;

        let remaining_orders = order::Entity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .all(&txn)
            .await?;
        let order_ids: Vec<Uuid> = remaining_orders.iter().map(|o| o.id).collect();

        let mut active: warehouse_session::ActiveModel = session.into();
        if order_ids.is_empty() {
            discard_session_progress(&txn, session_id).await?;
            active.status = Set(SessionStatus::Abandoned);
            active.abandon_reason = Set(Some("last order removed".to_string()));
        }
        active.last_activity_at = Set(now);
        let session = active.update(&txn).await?;
        txn.commit().await?;

        info!(session_id = %session_id, order_id = %order_id, "order removed from session");
        self.event_sender
            .emit(Event::OrderReleased {
                session_id,
                order_id,
            })
            .await;

        Ok(SessionView {
            order_ids,
            ..view_without_orders(&session)
        })
    }

    pub(crate) async fn view(
        &self,
        session: &warehouse_session::Model,
    ) -> Result<SessionView, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::SessionId.eq(session.id))
            .all(self.db.as_ref())
            .await?;
        Ok(SessionView {
            order_ids: orders.iter().map(|o| o.id).collect(),
            ..view_without_orders(session)
        })
    }
}

/// Union pick list: product -> total quantity across all line items.
pub(crate) fn aggregate_line_items(
    items: impl IntoIterator<Item = (Uuid, i32)>,
) -> BTreeMap<Uuid, i32> {
    let mut totals = BTreeMap::new();
    for (product_id, quantity) in items {
        *totals.entry(product_id).or_insert(0) += quantity;
    }
    totals
}

pub(crate) async fn find_session<C: ConnectionTrait>(
    conn: &C,
    session_id: Uuid,
    store_id: Uuid,
) -> Result<warehouse_session::Model, ServiceError> {
    warehouse_session::Entity::find_by_id(session_id)
        .filter(warehouse_session::Column::StoreId.eq(store_id))
        .one(conn)
        .await?
        .ok_or(ServiceError::SessionNotFound(session_id))
}

/// Reverts every order claimed by the session to confirmed and clears the
/// claims. Returns the restored order ids.
async fn release_session_orders<C: ConnectionTrait>(
    conn: &C,
    session_id: Uuid,
) -> Result<Vec<Uuid>, ServiceError> {
    let orders = order::Entity::find()
        .filter(order::Column::SessionId.eq(session_id))
        .all(conn)
        .await?;
    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();

    order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(OrderStatus::Confirmed))
        .col_expr(order::Column::SessionId, Expr::value(Option::<Uuid>::None))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::SessionId.eq(session_id))
        .exec(conn)
        .await?;

    Ok(ids)
}

/// Discards pick list entries and pack assignments so they can never be
/// reused by a future session.
async fn discard_session_progress<C: ConnectionTrait>(
    conn: &C,
    session_id: Uuid,
) -> Result<(), ServiceError> {
    pick_list_entry::Entity::delete_many()
        .filter(pick_list_entry::Column::SessionId.eq(session_id))
        .exec(conn)
        .await?;
    pack_assignment::Entity::delete_many()
        .filter(pack_assignment::Column::SessionId.eq(session_id))
        .exec(conn)
        .await?;
    Ok(())
}

fn view_without_orders(session: &warehouse_session::Model) -> SessionView {
    SessionView {
        id: session.id,
        store_id: session.store_id,
        status: session.status.to_string(),
        created_by: session.created_by,
        abandon_reason: session.abandon_reason.clone(),
        created_at: session.created_at,
        last_activity_at: session.last_activity_at,
        order_ids: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_sums_across_orders() {
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        let totals = aggregate_line_items(vec![(x, 3), (y, 1), (x, 3)]);
        assert_eq!(totals.get(&x), Some(&6));
        assert_eq!(totals.get(&y), Some(&1));
    }

    #[test]
    fn aggregation_of_nothing_is_empty() {
        assert!(aggregate_line_items(Vec::new()).is_empty());
    }
}
