//! Subscription config entity - A recurring rule that grants points to the
//! members of its target groups.

use chrono::NaiveTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Subscription config database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscription_configs")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Unique name
    #[sea_orm(unique)]
    pub name: String,
    /// `"daily"`, `"weekly"` or `"monthly"`
    pub distribution_frequency: String,
    /// Weekday (0 = Monday) for weekly, day of month for monthly, None for daily
    pub distribution_day: Option<i32>,
    /// Time of day (UTC) the grant fires
    pub distribution_time: NaiveTime,
    /// Points granted to each member per run
    pub points_to_distribute: i64,
    /// Inactive configs are ignored by the scheduler
    pub is_active: bool,
    /// Last slot this config was processed for (UTC)
    pub last_processed_at: Option<DateTime>,
}

/// `SubscriptionConfig` relations live on the join table
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl Related<super::group::Entity> for Entity {
    fn to() -> RelationDef {
        super::subscription_config_group::Relation::Group.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::subscription_config_group::Relation::SubscriptionConfig.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
