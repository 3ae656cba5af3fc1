//! Invitation code entity - Gates self-registration.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Invitation code database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invitation_codes")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// The code users type in
    #[sea_orm(unique)]
    pub code: String,
    /// Optional expiry
    pub expiration_date: Option<DateTimeUtc>,
    /// How many registrations the code allows
    pub max_uses: i32,
    /// How many registrations used it so far
    pub times_used: i32,
    /// When the code was issued
    pub created_at: DateTimeUtc,
}

/// `InvitationCode` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
