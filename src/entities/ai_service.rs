//! AI service entity - Connection settings for one upstream completion API.
//!
//! System services are configured by administrators and usable by everyone;
//! user services belong to a single owner.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// AI service database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ai_services")]
pub struct Model {
    /// Unique identifier for the service config
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name (e.g., "Default GPT-4")
    pub name: String,
    /// Provider tag selecting the request/response schema (e.g., `"openai"`, `"ollama"`)
    pub service_type: String,
    /// Bearer credential, never serialized
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Endpoint base URL
    pub base_url: Option<String>,
    /// Model identifier sent upstream
    pub model_name: Option<String>,
    /// Available to all users
    pub is_system_service: bool,
    /// Owner of a user service (also kept when an admin promotes it)
    pub owner_id: Option<i64>,
    /// Fallback system service when a user has no active service
    pub is_default: bool,
    /// Request a streamed response
    pub enable_streaming: bool,
}

/// `AiService` has no declared relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
