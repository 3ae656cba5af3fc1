//! Group entity - A named set of users targeted by subscriptions.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Group database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "groups")]
pub struct Model {
    /// Unique identifier for the group
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Unique group name
    #[sea_orm(unique)]
    pub name: String,
}

/// `Group` relations live on the join tables
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        super::user_group::Relation::User.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::user_group::Relation::Group.def().rev())
    }
}

impl Related<super::subscription_config::Entity> for Entity {
    fn to() -> RelationDef {
        super::subscription_config_group::Relation::SubscriptionConfig.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::subscription_config_group::Relation::Group.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
