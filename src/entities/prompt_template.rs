//! Prompt template entity - A placeholder template used to build prompts.
//! Templates with no owner are system templates.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Prompt template database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "prompt_templates")]
pub struct Model {
    /// Unique identifier for the template
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Name, unique per owner
    pub name: String,
    /// Template text containing `@[...]` placeholders
    #[sea_orm(column_type = "Text")]
    pub template_string: String,
    /// Marks the template preselected in the editor
    pub is_default: bool,
    /// Owner, None for a system template
    pub user_id: Option<i64>,
    /// When the template was created
    pub created_at: DateTime,
    /// When the template was last modified
    pub updated_at: DateTime,
}

/// `PromptTemplate` has no declared relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
