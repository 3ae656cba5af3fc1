//! Join table between users and groups.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Membership of one user in one group
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_groups")]
pub struct Model {
    /// Member
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    /// Group
    #[sea_orm(primary_key, auto_increment = false)]
    pub group_id: i64,
}

/// Both sides of the membership
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The member
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    /// The group
    #[sea_orm(
        belongs_to = "super::group::Entity",
        from = "Column::GroupId",
        to = "super::group::Column::Id"
    )]
    Group,
}

impl ActiveModelBehavior for ActiveModel {}
