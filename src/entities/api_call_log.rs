//! API call log entity - One billed AI call.
//!
//! Username and service name are denormalized so the log stays readable after
//! the user or service is removed.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// API call log database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "api_call_logs")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Calling user
    pub user_id: i64,
    /// Calling user's name at the time of the call
    pub username: String,
    /// When the call was settled
    pub timestamp: DateTimeUtc,
    /// Service used
    pub ai_service_id: Option<i64>,
    /// Service name at the time of the call
    pub ai_service_name: String,
    /// Whether the service was a system service
    pub is_system_service: bool,
    /// Tokens reported by the upstream usage block
    pub tokens_consumed: i64,
    /// Points taken from the balance
    pub points_deducted: i64,
    /// Rendered prompt length in characters
    pub prompt_length: Option<i64>,
    /// Generated text length in characters
    pub response_length: Option<i64>,
}

/// `ApiCallLog` has no declared relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
