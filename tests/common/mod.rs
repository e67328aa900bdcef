//! Shared harness for integration tests: an in-memory database with the
//! migrated schema, the service stack wired the way `main` wires it, and
//! seed helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use sea_orm_migration::MigratorTrait;
use tokio::sync::mpsc;
use uuid::Uuid;

use packhouse_api::config::WarehouseConfig;
use packhouse_api::entities::{
    order::{self, OrderStatus},
    order_item, pack_assignment, pick_list_entry, product, stock_movement,
    warehouse_session::{self, SessionStatus},
};
use packhouse_api::events::{process_events, EventSender};
use packhouse_api::migrator::Migrator;
use packhouse_api::services::{
    packing::PackingService, picking::PickingService, reaper::SessionReaper,
    sessions::SessionService, stock::StockLedgerService,
};

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub store_id: Uuid,
    pub user_id: Uuid,
    pub sessions: Arc<SessionService>,
    pub picking: PickingService,
    pub packing: PackingService,
    pub stock: StockLedgerService,
    pub reaper: SessionReaper,
}

impl TestApp {
    /// Fresh in-memory SQLite with a single connection, so every spawned
    /// task sees the same database and transactions serialize at the pool
    /// instead of hitting a separate empty `:memory:` instance.
    pub async fn new() -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options
            .max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .acquire_timeout(Duration::from_secs(5))
            .sqlx_logging(false);
        let db = Arc::new(
            Database::connect(options)
                .await
                .expect("in-memory database"),
        );
        Migrator::up(db.as_ref(), None).await.expect("migrations");

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(process_events(rx));
        let event_sender = EventSender::new(tx);

        let warehouse = WarehouseConfig::default();
        let sessions = Arc::new(SessionService::new(db.clone(), event_sender.clone()));
        Self {
            picking: PickingService::new(db.clone(), event_sender.clone()),
            packing: PackingService::new(db.clone(), event_sender.clone(), &warehouse),
            stock: StockLedgerService::new(db.clone(), event_sender),
            reaper: SessionReaper::new(db.clone(), sessions.clone()),
            sessions,
            store_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            db,
        }
    }

    pub async fn seed_product(&self, name: &str, stock_on_hand: i32) -> Uuid {
        self.seed_product_for(self.store_id, name, stock_on_hand).await
    }

    pub async fn seed_product_for(&self, store_id: Uuid, name: &str, stock_on_hand: i32) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            store_id: Set(store_id),
            name: Set(name.to_string()),
            sku: Set(format!("SKU-{}", &id.simple().to_string()[..8])),
            stock_on_hand: Set(stock_on_hand),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert product");
        id
    }

    /// A confirmed, unclaimed order with the given (product, quantity)
    /// line items.
    pub async fn seed_order(&self, items: &[(Uuid, i32)]) -> Uuid {
        self.seed_order_for(self.store_id, items).await
    }

    pub async fn seed_order_for(&self, store_id: Uuid, items: &[(Uuid, i32)]) -> Uuid {
        let order_id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(order_id),
            store_id: Set(store_id),
            order_number: Set(format!("ORD-{}", &order_id.simple().to_string()[..8])),
            status: Set(OrderStatus::Confirmed),
            session_id: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert order");

        for &(product_id, quantity) in items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product_id),
                quantity: Set(quantity),
            }
            .insert(self.db.as_ref())
            .await
            .expect("insert order item");
        }
        order_id
    }

    pub async fn order_status(&self, order_id: Uuid) -> OrderStatus {
        order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await
            .expect("load order")
            .expect("order exists")
            .status
    }

    pub async fn order_session(&self, order_id: Uuid) -> Option<Uuid> {
        order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await
            .expect("load order")
            .expect("order exists")
            .session_id
    }

    pub async fn session_status(&self, session_id: Uuid) -> SessionStatus {
        self.session_model(session_id).await.status
    }

    pub async fn session_model(&self, session_id: Uuid) -> warehouse_session::Model {
        warehouse_session::Entity::find_by_id(session_id)
            .one(self.db.as_ref())
            .await
            .expect("load session")
            .expect("session exists")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(self.db.as_ref())
            .await
            .expect("load product")
            .expect("product exists")
            .stock_on_hand
    }

    /// Overwrites a product's stock out-of-band, simulating an external
    /// adjustment racing the session.
    pub async fn set_stock(&self, product_id: Uuid, stock_on_hand: i32) {
        let model = product::Entity::find_by_id(product_id)
            .one(self.db.as_ref())
            .await
            .expect("load product")
            .expect("product exists");
        let mut active: product::ActiveModel = model.into();
        active.stock_on_hand = Set(stock_on_hand);
        active.update(self.db.as_ref()).await.expect("set stock");
    }

    pub async fn movements_for(&self, product_id: Uuid) -> Vec<stock_movement::Model> {
        stock_movement::Entity::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .order_by_asc(stock_movement::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .expect("load movements")
    }

    pub async fn pick_entry(&self, session_id: Uuid, product_id: Uuid) -> pick_list_entry::Model {
        pick_list_entry::Entity::find()
            .filter(pick_list_entry::Column::SessionId.eq(session_id))
            .filter(pick_list_entry::Column::ProductId.eq(product_id))
            .one(self.db.as_ref())
            .await
            .expect("load pick list entry")
            .expect("entry exists")
    }

    pub async fn assignments_for(&self, session_id: Uuid) -> Vec<pack_assignment::Model> {
        pack_assignment::Entity::find()
            .filter(pack_assignment::Column::SessionId.eq(session_id))
            .all(self.db.as_ref())
            .await
            .expect("load pack assignments")
    }

    /// Marks every pick list entry fully picked through the service, so
    /// the session is ready for `finish_picking`.
    pub async fn pick_everything(&self, session_id: Uuid) {
        let list = self
            .picking
            .get_picking_list(session_id, self.store_id)
            .await
            .expect("picking list");
        for item in list {
            self.picking
                .update_picking_progress(
                    session_id,
                    self.store_id,
                    item.product_id,
                    item.quantity_required,
                )
                .await
                .expect("record pick");
        }
    }

    /// Rewinds a session's last activity, as if it had been idle.
    pub async fn backdate_session(&self, session_id: Uuid, hours: i64) {
        let session = warehouse_session::Entity::find_by_id(session_id)
            .one(self.db.as_ref())
            .await
            .expect("load session")
            .expect("session exists");
        let mut active: warehouse_session::ActiveModel = session.into();
        active.last_activity_at = Set(Utc::now() - ChronoDuration::hours(hours));
        active.update(self.db.as_ref()).await.expect("backdate session");
    }
}
