use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-order-per-product packed quantity within a session. Rows are
/// materialized zero-initialized when picking finishes and incremented one
/// unit at a time by the atomic pack claim.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pack_assignments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub session_id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    /// The order's line-item quantity for this product, denormalized so the
    /// claim's guard is a single-row condition.
    pub quantity_required: i32,
    pub quantity_packed: i32,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_satisfied(&self) -> bool {
        self.quantity_packed >= self.quantity_required
    }

    pub fn remaining(&self) -> i32 {
        self.quantity_required - self.quantity_packed
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::warehouse_session::Entity",
        from = "Column::SessionId",
        to = "super::warehouse_session::Column::Id"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::warehouse_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
