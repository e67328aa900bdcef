use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{product, stock_movement},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Bounded CAS retries for a standalone stock adjustment.
const ADJUST_RETRY_ATTEMPTS: u32 = 3;
const ADJUST_RETRY_BASE_DELAY_MS: u64 = 10;

/// Result of an atomic stock adjustment: the on-hand quantity before and
/// after, as observed inside the committing transaction.
#[derive(Debug, Clone, Serialize)]
pub struct StockAdjustment {
    pub product_id: Uuid,
    pub previous_quantity: i32,
    pub new_quantity: i32,
}

/// The stock ledger: the only code path allowed to mutate
/// `products.stock_on_hand`. Every mutation is a guarded conditional update
/// paired with a stock_movement row in the same transaction.
#[derive(Clone)]
pub struct StockLedgerService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockLedgerService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Adjusts a product's on-hand stock by `delta` (negative to decrement)
    /// in its own transaction. Concurrent mutations are detected by the CAS
    /// guard and retried with jittered backoff up to a small bound.
    #[instrument(skip(self))]
    pub async fn adjust_stock_atomic(
        &self,
        store_id: Uuid,
        product_id: Uuid,
        delta: i32,
        reason: &str,
        created_by: Option<Uuid>,
    ) -> Result<StockAdjustment, ServiceError> {
        if delta == 0 {
            return Err(ServiceError::ValidationError(
                "adjustment delta cannot be zero".into(),
            ));
        }
        // Tenancy check up front; adjust_on itself is store-agnostic.
        product::Entity::find_by_id(product_id)
            .filter(product::Column::StoreId.eq(store_id))
            .one(self.db.as_ref())
            .await?
            .ok_or(ServiceError::ProductNotFound(product_id))?;

        let mut attempt = 0;
        loop {
            let txn = self.db.begin().await?;
            match Self::adjust_on(
                &txn,
                product_id,
                delta,
                "manual_adjustment",
                Some(reason),
                None,
                created_by,
            )
            .await
            {
                Ok(adjustment) => {
                    txn.commit().await?;
                    self.event_sender
                        .emit(Event::StockAdjusted {
                            product_id,
                            previous_quantity: adjustment.previous_quantity,
                            new_quantity: adjustment.new_quantity,
                            reason: reason.to_string(),
                            occurred_at: Utc::now(),
                        })
                        .await;
                    info!(
                        product_id = %product_id,
                        delta,
                        new_quantity = adjustment.new_quantity,
                        "stock adjusted"
                    );
                    return Ok(adjustment);
                }
                Err(ServiceError::Conflict(_)) if attempt + 1 < ADJUST_RETRY_ATTEMPTS => {
                    drop(txn);
                    attempt += 1;
                    let jitter = rand::thread_rng().gen_range(0..=ADJUST_RETRY_BASE_DELAY_MS);
                    tokio::time::sleep(Duration::from_millis(
                        ADJUST_RETRY_BASE_DELAY_MS * u64::from(attempt) + jitter,
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The atomic primitive, running inside the caller's transaction.
    /// Session completion uses this so the decrement, the movement row, and
    /// the status flips all commit together.
    pub(crate) async fn adjust_on<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        delta: i32,
        movement_type: &str,
        reason: Option<&str>,
        reference: Option<(Uuid, &str)>,
        created_by: Option<Uuid>,
    ) -> Result<StockAdjustment, ServiceError> {
        let prod = product::Entity::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or(ServiceError::ProductNotFound(product_id))?;

        let before = prod.stock_on_hand;
        let after = before + delta;
        if after < 0 {
            return Err(ServiceError::InsufficientStock {
                product: prod.name,
                available: before,
                requested: -delta,
            });
        }

        // CAS guard on the observed quantity: a concurrent writer makes this
        // match zero rows instead of silently losing an update.
        let update = product::Entity::update_many()
            .col_expr(product::Column::StockOnHand, Expr::value(after))
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::StockOnHand.eq(before))
            .exec(conn)
            .await?;
        if update.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "concurrent stock mutation for product {}",
                product_id
            )));
        }

        let movement = stock_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            movement_type: Set(movement_type.to_string()),
            quantity: Set(delta),
            previous_quantity: Set(before),
            new_quantity: Set(after),
            reference_id: Set(reference.map(|(id, _)| id)),
            reference_type: Set(reference.map(|(_, kind)| kind.to_string())),
            reason: Set(reason.map(str::to_string)),
            created_by: Set(created_by),
            created_at: Set(Utc::now()),
        };
        movement.insert(conn).await?;

        Ok(StockAdjustment {
            product_id,
            previous_quantity: before,
            new_quantity: after,
        })
    }
}
