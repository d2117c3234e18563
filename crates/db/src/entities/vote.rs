//! Vote entity: one voter's current vote on one source rating.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use shuriken_common::{AppResult, Voter};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vote")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Source rating (never a mirror)
    #[sea_orm(indexed)]
    pub rating_id: String,

    /// Voting user, `0` for guests
    #[sea_orm(indexed)]
    pub user_id: i64,

    /// Guest IP address
    #[sea_orm(nullable)]
    pub user_ip: Option<String>,

    pub rating_value: i32,

    pub date_created: DateTimeWithTimeZone,

    pub date_modified: DateTimeWithTimeZone,
}

impl Model {
    /// The voter who owns this vote.
    pub fn voter(&self) -> AppResult<Voter> {
        Voter::from_columns(self.user_id, self.user_ip.as_deref())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::rating::Entity",
        from = "Column::RatingId",
        to = "super::rating::Column::Id",
        on_delete = "Cascade"
    )]
    Rating,
}

impl Related<super::rating::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rating.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
