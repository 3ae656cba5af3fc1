//! Join table between subscription configs and their target groups.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One target group of one subscription config
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscription_config_groups")]
pub struct Model {
    /// Subscription config
    #[sea_orm(primary_key, auto_increment = false)]
    pub subscription_config_id: i64,
    /// Target group
    #[sea_orm(primary_key, auto_increment = false)]
    pub group_id: i64,
}

/// Both sides of the link
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The config
    #[sea_orm(
        belongs_to = "super::subscription_config::Entity",
        from = "Column::SubscriptionConfigId",
        to = "super::subscription_config::Column::Id"
    )]
    SubscriptionConfig,
    /// The group
    #[sea_orm(
        belongs_to = "super::group::Entity",
        from = "Column::GroupId",
        to = "super::group::Column::Id"
    )]
    Group,
}

impl ActiveModelBehavior for ActiveModel {}
