//! User entity - An account with a point balance and group memberships.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Login name
    #[sea_orm(unique)]
    pub username: String,
    /// Optional contact address
    pub email: Option<String>,
    /// Argon2id PHC string
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Administrators manage groups, codes, subscriptions and are never billed
    pub is_admin: bool,
    /// Forces a password change on next login
    pub password_change_required: bool,
    /// Editor preference: save the open document when navigating away
    pub auto_save_on_navigate: bool,
    /// Current point balance
    pub points: i64,
    /// AI service used when a generation request names none
    pub active_ai_service_id: Option<i64>,
    /// When the account was created
    pub created_at: DateTimeUtc,
}

/// `User` relations live on the `user_groups` join table
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl Related<super::group::Entity> for Entity {
    fn to() -> RelationDef {
        super::user_group::Relation::Group.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::user_group::Relation::User.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
