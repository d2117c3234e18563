//! Rating entity: a named target that collects 1..N star votes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How a sub-rating's votes feed its parent's total.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum EffectType {
    /// Higher votes raise the parent's average.
    #[default]
    #[sea_orm(string_value = "positive")]
    Positive,
    /// Higher votes lower the parent's average.
    #[sea_orm(string_value = "negative")]
    Negative,
}

impl std::str::FromStr for EffectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            other => Err(format!("unknown effect type: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rating")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub name: String,

    /// Number of contributing votes
    pub total_votes: i64,

    /// Sum of contributing vote values (polarity-adjusted for aggregates)
    pub total_rating: i64,

    #[sea_orm(nullable, indexed)]
    pub parent_id: Option<String>,

    pub effect_type: EffectType,

    pub display_only: bool,

    /// Source rating whose votes this rating displays
    #[sea_orm(nullable, indexed)]
    pub mirror_of: Option<String>,

    pub date_created: DateTimeWithTimeZone,
}

impl Model {
    /// Whether this rating displays another rating's votes.
    #[must_use]
    pub const fn is_mirror(&self) -> bool {
        self.mirror_of.is_some()
    }

    /// The rating that actually holds this rating's votes.
    #[must_use]
    pub fn source_id(&self) -> &str {
        self.mirror_of.as_deref().unwrap_or(&self.id)
    }

    /// Average vote, rounded to one decimal. Zero when nobody voted.
    #[must_use]
    pub fn average(&self) -> f64 {
        average(self.total_votes, self.total_rating)
    }
}

/// Average of `total_rating / total_votes`, rounded to one decimal.
#[must_use]
pub fn average(total_votes: i64, total_rating: i64) -> f64 {
    if total_votes <= 0 {
        return 0.0;
    }
    let raw = total_rating as f64 / total_votes as f64;
    (raw * 10.0).round() / 10.0
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ParentId",
        to = "Column::Id",
        on_delete = "SetNull"
    )]
    Parent,

    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::MirrorOf",
        to = "Column::Id",
        on_delete = "SetNull"
    )]
    Source,

    #[sea_orm(has_many = "super::vote::Entity")]
    Votes,
}

impl Related<super::vote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Votes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
