//! Item entity - A node of a user's project tree.
//!
//! Folders hold other items, books hold prose, setting documents hold a list of
//! toggleable fact snippets. Siblings are ordered by a dense zero-based `order`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Item database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "items")]
pub struct Model {
    /// Unique identifier for the item
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User who owns the tree this item belongs to
    pub owner_id: i64,
    /// Display name
    pub name: String,
    /// `"folder"`, `"book"` or `"setting"`
    pub item_type: String,
    /// Containing folder, None for root-level items
    pub parent_id: Option<i64>,
    /// Position among siblings (0-based)
    pub order: i32,
    /// Book text
    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,
    /// Setting document entries as a JSON list of `{text, enabled}`
    pub settings_data: Option<Json>,
    /// Folder collapsed state in the tree view
    pub collapsed: Option<bool>,
    /// Setting document linked to a book
    pub setting_book_id: Option<i64>,
}

/// Defines relationships between Item and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each item may sit inside one parent folder
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ParentId",
        to = "Column::Id"
    )]
    Parent,
}

impl ActiveModelBehavior for ActiveModel {}
