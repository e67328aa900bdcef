use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One batch-fulfillment run: a set of claimed orders moving through
/// picking and packing together.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "warehouse_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub status: SessionStatus,
    pub created_by: Uuid,
    pub abandon_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Session lifecycle. Transitions are one-directional; `Completed` and
/// `Abandoned` are terminal and the row becomes immutable.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    #[sea_orm(string_value = "picking")]
    Picking,
    #[sea_orm(string_value = "packing")]
    Packing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "abandoned")]
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// Exhaustive transition table for the session state machine.
    pub fn can_transition(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Picking, Self::Packing)
                | (Self::Packing, Self::Completed)
                | (Self::Picking, Self::Abandoned)
                | (Self::Packing, Self::Abandoned)
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::pick_list_entry::Entity")]
    PickListEntries,
    #[sea_orm(has_many = "super::pack_assignment::Entity")]
    PackAssignments,
}

impl Related<super::pick_list_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PickListEntries.def()
    }
}

impl Related<super::pack_assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PackAssignments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
