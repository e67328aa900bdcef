use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    config::WarehouseConfig,
    entities::{
        order::{self, OrderStatus},
        pack_assignment, pick_list_entry,
        warehouse_session::{self, SessionStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::sessions::find_session,
};

#[derive(Debug, Clone, Serialize)]
pub struct PackingItemView {
    pub product_id: Uuid,
    pub quantity_required: i32,
    pub quantity_packed: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackingOrderView {
    pub order_id: Uuid,
    pub order_number: String,
    pub fully_packed: bool,
    pub items: Vec<PackingItemView>,
}

/// Outcome of a successful one-unit pack claim.
#[derive(Debug, Clone, Serialize)]
pub struct PackClaim {
    pub session_id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity_required: i32,
    pub quantity_packed: i32,
    pub order_fully_packed: bool,
}

/// Re-disaggregates picked stock into per-order packed quantities. The
/// claim is the highest-contention operation in the system: multiple
/// packers race to allocate units of a shared product pool to different
/// orders.
#[derive(Clone)]
pub struct PackingService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    retry_attempts: u32,
    retry_base_delay_ms: u64,
}

impl PackingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        cfg: &WarehouseConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            retry_attempts: cfg.claim_retry_attempts.max(1),
            retry_base_delay_ms: cfg.claim_retry_base_delay_ms,
        }
    }

    /// Per-order packing progress for a session. No side effects.
    #[instrument(skip(self))]
    pub async fn get_packing_list(
        &self,
        session_id: Uuid,
        store_id: Uuid,
    ) -> Result<Vec<PackingOrderView>, ServiceError> {
        let db = self.db.as_ref();
        find_session(db, session_id, store_id).await?;

        let orders = order::Entity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .all(db)
            .await?;
        let assignments = pack_assignment::Entity::find()
            .filter(pack_assignment::Column::SessionId.eq(session_id))
            .all(db)
            .await?;

        let mut by_order: BTreeMap<Uuid, Vec<&pack_assignment::Model>> = BTreeMap::new();
        for assignment in &assignments {
            by_order.entry(assignment.order_id).or_default().push(assignment);
        }

        let mut views = Vec::with_capacity(orders.len());
        for order in &orders {
            let rows = by_order.remove(&order.id).unwrap_or_default();
            views.push(PackingOrderView {
                order_id: order.id,
                order_number: order.order_number.clone(),
                // An order with nothing to pack is vacuously packed, the
                // same rule the completion gate applies.
                fully_packed: rows.iter().all(|a| a.is_satisfied()),
                items: rows
                    .iter()
                    .map(|a| PackingItemView {
                        product_id: a.product_id,
                        quantity_required: a.quantity_required,
                        quantity_packed: a.quantity_packed,
                    })
                    .collect(),
            });
        }
        views.sort_by(|a, b| a.order_number.cmp(&b.order_number));
        Ok(views)
    }

    /// Assigns exactly one additional unit of the product to the order's
    /// pack assignment. Linearizable per (session, product): the pool claim
    /// is a guarded conditional update, so two packers racing for the last
    /// unit can never both succeed. Transient lock/serialization failures
    /// are retried with jittered backoff before surfacing as `Conflict`.
    #[instrument(skip(self))]
    pub async fn claim_pack_unit(
        &self,
        session_id: Uuid,
        store_id: Uuid,
        order_id: Uuid,
        product_id: Uuid,
    ) -> Result<PackClaim, ServiceError> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .try_claim(session_id, store_id, order_id, product_id)
                .await
            {
                Ok(claim) => {
                    self.event_sender
                        .emit(Event::PackUnitClaimed {
                            session_id,
                            order_id,
                            product_id,
                        })
                        .await;
                    return Ok(claim);
                }
                Err(ServiceError::DatabaseError(err)) if is_retryable(&err) => {
                    attempt += 1;
                    if attempt >= self.retry_attempts {
                        warn!(
                            session_id = %session_id,
                            product_id = %product_id,
                            attempts = attempt,
                            "pack claim contention exhausted retries"
                        );
                        return Err(ServiceError::Conflict(format!(
                            "packing claim for product {} kept conflicting after {} attempts",
                            product_id, attempt
                        )));
                    }
                    let jitter = rand::thread_rng().gen_range(0..=self.retry_base_delay_ms);
                    let delay = self.retry_base_delay_ms * u64::from(attempt) + jitter;
                    debug!(
                        session_id = %session_id,
                        product_id = %product_id,
                        attempt,
                        delay_ms = delay,
                        "retrying pack claim"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn try_claim(
        &self,
        session_id: Uuid,
        store_id: Uuid,
        order_id: Uuid,
        product_id: Uuid,
    ) -> Result<PackClaim, ServiceError> {
        let txn = self.db.begin().await?;
        let session = find_session(&txn, session_id, store_id).await?;
        match session.status {
            SessionStatus::Packing => {}
            s if s.is_terminal() => return Err(ServiceError::SessionTerminal(session_id)),
            _ => return Err(ServiceError::SessionNotInPacking(session_id)),
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
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::OrderNotEligible {
                order_id,
                product_id,
            });
        }

        let assignment = pack_assignment::Entity::find()
            .filter(pack_assignment::Column::SessionId.eq(session_id))
            .filter(pack_assignment::Column::OrderId.eq(order_id))
            .filter(pack_assignment::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or(ServiceError::OrderNotEligible {
                order_id,
                product_id,
            })?;

        let now = Utc::now();

        // The pool claim. This conditional increment is the single place
        // that can consume a picked unit, which is what makes the pool
        // invariant (sum packed <= picked) hold under concurrency.
        let pool = pick_list_entry::Entity::update_many()
            .col_expr(
                pick_list_entry::Column::UnitsAssigned,
                Expr::col(pick_list_entry::Column::UnitsAssigned).add(1),
            )
            .col_expr(pick_list_entry::Column::UpdatedAt, Expr::value(now))
            .filter(pick_list_entry::Column::SessionId.eq(session_id))
            .filter(pick_list_entry::Column::ProductId.eq(product_id))
            .filter(
                Expr::col(pick_list_entry::Column::UnitsAssigned)
                    .lt(Expr::col(pick_list_entry::Column::QuantityPicked)),
            )
            .exec(&txn)
            .await?;
        if pool.rows_affected == 0 {
            return Err(ServiceError::NoUnitsAvailable { product_id });
        }

        // Guarded so the order can never receive more than its required
        // quantity; a miss rolls the pool claim back with the transaction.
        let packed = pack_assignment::Entity::update_many()
            .col_expr(
                pack_assignment::Column::QuantityPacked,
                Expr::col(pack_assignment::Column::QuantityPacked).add(1),
            )
            .col_expr(pack_assignment::Column::UpdatedAt, Expr::value(now))
            .filter(pack_assignment::Column::Id.eq(assignment.id))
            .filter(
                Expr::col(pack_assignment::Column::QuantityPacked)
                    .lt(Expr::col(pack_assignment::Column::QuantityRequired)),
            )
            .exec(&txn)
            .await?;
        if packed.rows_affected == 0 {
            txn.rollback().await?;
            return Err(ServiceError::OrderNotEligible {
                order_id,
                product_id,
            });
        }

        warehouse_session::Entity::update_many()
            .col_expr(
                warehouse_session::Column::LastActivityAt,
                Expr::value(now),
            )
            .filter(warehouse_session::Column::Id.eq(session_id))
            .exec(&txn)
            .await?;

        // Readiness and the reported packed count are re-read inside the
        // same transaction: the pre-claim snapshot can be stale under
        // concurrent claims (two racers both observing the old count), and
        // the contract is that success returns the updated assignment. The
        // order's visible status stays `packing` until the whole session
        // completes.
        let order_assignments = pack_assignment::Entity::find()
            .filter(pack_assignment::Column::SessionId.eq(session_id))
            .filter(pack_assignment::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        let order_fully_packed = order_assignments.iter().all(|a| a.is_satisfied());
        let updated = order_assignments
            .iter()
            .find(|a| a.id == assignment.id)
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "pack assignment {} vanished mid-claim",
                    assignment.id
                ))
            })?;

        txn.commit().await?;

        Ok(PackClaim {
            session_id,
            order_id,
            product_id,
            quantity_required: updated.quantity_required,
            quantity_packed: updated.quantity_packed,
            order_fully_packed,
        })
    }
}

/// Lock contention and serialization failures are transient; everything
/// else propagates immediately.
fn is_retryable(err: &DbErr) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("database is locked")
        || msg.contains("busy")
        || msg.contains("deadlock")
        || msg.contains("could not serialize")
}
