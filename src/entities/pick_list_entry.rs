use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregated pick progress for one product within a session: the required
/// quantity summed across every order in the session, the cumulative picked
/// count, and the packing pool counter.
///
/// Invariants: `0 <= quantity_picked <= quantity_required` and
/// `0 <= units_assigned <= quantity_picked`. `units_assigned` is the number
/// of picked units already claimed by pack assignments; claims increment it
/// with a guarded conditional update, which is what serializes concurrent
/// packers and enforces the pool invariant.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pick_list_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub session_id: Uuid,
    pub product_id: Uuid,
    pub quantity_required: i32,
    pub quantity_picked: i32,
    pub units_assigned: i32,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_complete(&self) -> bool {
        self.quantity_picked >= self.quantity_required
    }

    /// Picked units not yet claimed by any pack assignment.
    pub fn pool_remaining(&self) -> i32 {
        self.quantity_picked - self.units_assigned
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
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::warehouse_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
