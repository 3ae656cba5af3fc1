//! Project tree business logic - folders, books and setting documents.
//!
//! Every user owns one tree. Siblings under the same parent carry a dense
//! zero-based `order`; create appends, move and delete renumber whatever they
//! disturbed. Multi-row changes run inside a single database transaction.

use crate::{
    entities::{Item, item},
    errors::{Error, Result},
};
use sea_orm::{
    Condition, QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Kind of tree node, stored as `items.item_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Holds other items
    Folder,
    /// Holds prose
    Book,
    /// Holds a list of setting entries
    Setting,
}

impl ItemKind {
    /// Stored tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Book => "book",
            Self::Setting => "setting",
        }
    }

    /// Kind of a stored row; unknown tags are reported as validation errors.
    pub fn of(model: &item::Model) -> Result<Self> {
        model.item_type.parse()
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "folder" => Ok(Self::Folder),
            "book" => Ok(Self::Book),
            "setting" => Ok(Self::Setting),
            other => Err(Error::validation(format!("Invalid item type: {other}"))),
        }
    }
}

const fn default_enabled() -> bool {
    true
}

/// One fact snippet inside a setting document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    /// Snippet text
    #[serde(default)]
    pub text: String,
    /// Whether generation includes this snippet
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn settings_of(model: &item::Model) -> Vec<SettingEntry> {
    model
        .settings_data
        .clone()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

/// Kind-specific part of an [`ItemView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ItemPayload {
    /// Folder state and, in tree listings, its children
    Folder {
        /// Collapsed in the tree view
        collapsed: bool,
        /// Ordered children; absent in flat listings
        #[serde(skip_serializing_if = "Option::is_none")]
        children: Option<Vec<ItemView>>,
    },
    /// Book link to a setting document
    Book {
        /// Linked setting document
        #[serde(skip_serializing_if = "Option::is_none")]
        setting_book_id: Option<i64>,
    },
    /// Setting document entries
    Setting {
        /// Entries in display order
        settings: Vec<SettingEntry>,
    },
}

/// API representation of a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    /// Item id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Containing folder
    pub parent_id: Option<i64>,
    /// Position among siblings
    pub order: i32,
    /// Kind-specific fields
    #[serde(flatten)]
    pub payload: ItemPayload,
}

impl ItemView {
    /// Flat view of a single row (folders carry no children).
    pub fn from_model(model: &item::Model) -> Result<Self> {
        let payload = match ItemKind::of(model)? {
            ItemKind::Folder => ItemPayload::Folder {
                collapsed: model.collapsed.unwrap_or(true),
                children: None,
            },
            ItemKind::Book => ItemPayload::Book {
                setting_book_id: model.setting_book_id,
            },
            ItemKind::Setting => ItemPayload::Setting {
                settings: settings_of(model),
            },
        };

        Ok(Self {
            id: model.id,
            name: model.name.clone(),
            parent_id: model.parent_id,
            order: model.order,
            payload,
        })
    }
}

/// Short reference to a linked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemLink {
    /// Item id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Kind of the linked item
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

/// Editable content of a book or setting document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ItemContent {
    /// Book text and its setting document
    Book {
        /// Item id
        id: i64,
        /// Display name
        name: String,
        /// Book text, empty if never written
        content: String,
        /// Linked setting document
        #[serde(skip_serializing_if = "Option::is_none")]
        associated_setting: Option<ItemLink>,
    },
    /// Setting entries and the first book using them
    Setting {
        /// Item id
        id: i64,
        /// Display name
        name: String,
        /// Entries in display order
        settings: Vec<SettingEntry>,
        /// A book linked to this document
        #[serde(skip_serializing_if = "Option::is_none")]
        associated_book_info: Option<ItemLink>,
    },
}

/// New content for [`update_content`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUpdate {
    /// Replacement book text
    Book(String),
    /// Replacement setting entries
    Setting(Vec<SettingEntry>),
}

fn parent_condition(parent_id: Option<i64>) -> Condition {
    match parent_id {
        Some(id) => Condition::all().add(item::Column::ParentId.eq(id)),
        None => Condition::all().add(item::Column::ParentId.is_null()),
    }
}

/// Finds an item of the given owner, or fails with [`Error::NotFound`].
pub async fn get_owned_item<C>(db: &C, owner_id: i64, item_id: i64) -> Result<item::Model>
where
    C: ConnectionTrait,
{
    Item::find_by_id(item_id)
        .filter(item::Column::OwnerId.eq(owner_id))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("item", item_id))
}

/// Children of a parent (or the root level), ordered by position.
pub async fn list_children<C>(
    db: &C,
    owner_id: i64,
    parent_id: Option<i64>,
) -> Result<Vec<item::Model>>
where
    C: ConnectionTrait,
{
    Item::find()
        .filter(item::Column::OwnerId.eq(owner_id))
        .filter(parent_condition(parent_id))
        .order_by_asc(item::Column::Order)
        .order_by_asc(item::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// The owner's whole tree as nested views, root level first.
pub async fn get_tree<C>(db: &C, owner_id: i64) -> Result<Vec<ItemView>>
where
    C: ConnectionTrait,
{
    let items = Item::find()
        .filter(item::Column::OwnerId.eq(owner_id))
        .order_by_asc(item::Column::Order)
        .order_by_asc(item::Column::Id)
        .all(db)
        .await?;

    let mut by_parent: HashMap<Option<i64>, Vec<&item::Model>> = HashMap::new();
    for model in &items {
        by_parent.entry(model.parent_id).or_default().push(model);
    }

    build_level(&by_parent, None, 0)
}

fn build_level(
    by_parent: &HashMap<Option<i64>, Vec<&item::Model>>,
    parent_id: Option<i64>,
    depth: usize,
) -> Result<Vec<ItemView>> {
    // A corrupted parent chain could loop forever
    if depth > by_parent.len() {
        return Err(Error::InvalidMove {
            message: "Item hierarchy contains a cycle".to_string(),
        });
    }

    let Some(level) = by_parent.get(&parent_id) else {
        return Ok(Vec::new());
    };

    level
        .iter()
        .map(|model| {
            let mut view = ItemView::from_model(model)?;
            if let ItemPayload::Folder { children, .. } = &mut view.payload {
                *children = Some(build_level(by_parent, Some(model.id), depth + 1)?);
            }
            Ok(view)
        })
        .collect()
}

/// Creates an item at the end of its parent's children.
///
/// The name is trimmed and must not be empty. The parent, if given, must be a
/// folder owned by the same user.
pub async fn create_item(
    db: &DatabaseConnection,
    owner_id: i64,
    name: &str,
    kind: ItemKind,
    parent_id: Option<i64>,
) -> Result<item::Model> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("Item name cannot be empty"));
    }

    let txn = db.begin().await?;

    if let Some(parent_id) = parent_id {
        let parent = get_owned_item(&txn, owner_id, parent_id).await?;
        if ItemKind::of(&parent)? != ItemKind::Folder {
            return Err(Error::validation("Parent must be a folder"));
        }
    }

    let last = Item::find()
        .filter(item::Column::OwnerId.eq(owner_id))
        .filter(parent_condition(parent_id))
        .order_by_desc(item::Column::Order)
        .one(&txn)
        .await?;
    let order = last.map_or(0, |last| last.order + 1);

    let model = item::ActiveModel {
        owner_id: Set(owner_id),
        name: Set(name.to_string()),
        item_type: Set(kind.as_str().to_string()),
        parent_id: Set(parent_id),
        order: Set(order),
        content: Set(None),
        settings_data: Set((kind == ItemKind::Setting).then(|| serde_json::json!([]))),
        collapsed: Set((kind == ItemKind::Folder).then_some(true)),
        setting_book_id: Set(None),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    tracing::info!(
        "Created {} '{}' (id {}) for user {}",
        kind,
        model.name,
        model.id,
        owner_id
    );
    Ok(model)
}

/// Renames an item; the new name is trimmed and must not be empty.
pub async fn rename_item(
    db: &DatabaseConnection,
    owner_id: i64,
    item_id: i64,
    name: &str,
) -> Result<item::Model> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("New name is required"));
    }

    let model = get_owned_item(db, owner_id, item_id).await?;
    let mut active: item::ActiveModel = model.into();
    active.name = Set(name.to_string());
    active.update(db).await.map_err(Into::into)
}

/// Sets the collapsed flag of a folder.
pub async fn toggle_folder(
    db: &DatabaseConnection,
    owner_id: i64,
    item_id: i64,
    collapsed: bool,
) -> Result<item::Model> {
    let model = get_owned_item(db, owner_id, item_id).await?;
    if ItemKind::of(&model)? != ItemKind::Folder {
        return Err(Error::validation("Not a folder"));
    }

    let mut active: item::ActiveModel = model.into();
    active.collapsed = Set(Some(collapsed));
    active.update(db).await.map_err(Into::into)
}

/// Computes the order updates that make a sibling sequence dense.
///
/// `sequence` lists `(id, current order)` in the desired final order. Only the
/// rows whose order differs from their index are returned.
#[must_use]
pub fn plan_sibling_orders(sequence: &[(i64, i32)]) -> Vec<(i64, i32)> {
    sequence
        .iter()
        .zip(0..)
        .filter(|((_, current), target)| current != target)
        .map(|((id, _), target)| (*id, target))
        .collect()
}

/// Position at which an item lands among `siblings` when inserted before `before`.
///
/// No `before`, or a `before` that is not among the siblings, means the end.
#[must_use]
pub fn insertion_index(siblings: &[i64], before: Option<i64>) -> usize {
    before
        .and_then(|before| siblings.iter().position(|id| *id == before))
        .unwrap_or(siblings.len())
}

async fn write_orders<C>(db: &C, updates: &[(i64, i32)]) -> Result<()>
where
    C: ConnectionTrait,
{
    for (id, order) in updates {
        tracing::debug!("Item {} moves to position {}", id, order);
        Item::update_many()
            .col_expr(item::Column::Order, Expr::value(*order))
            .filter(item::Column::Id.eq(*id))
            .exec(db)
            .await?;
    }
    Ok(())
}

async fn renumber_children<C>(db: &C, owner_id: i64, parent_id: Option<i64>) -> Result<()>
where
    C: ConnectionTrait,
{
    let sequence: Vec<(i64, i32)> = list_children(db, owner_id, parent_id)
        .await?
        .iter()
        .map(|child| (child.id, child.order))
        .collect();
    write_orders(db, &plan_sibling_orders(&sequence)).await
}

/// Moves an item under `target_parent_id` (None = root), before `before_id`
/// or at the end.
///
/// Rejects moving an item into itself or into one of its descendants. Both
/// the new and, if different, the old sibling lists end up dense.
pub async fn move_item(
    db: &DatabaseConnection,
    owner_id: i64,
    item_id: i64,
    target_parent_id: Option<i64>,
    before_id: Option<i64>,
) -> Result<item::Model> {
    let txn = db.begin().await?;
    let model = get_owned_item(&txn, owner_id, item_id).await?;

    if let Some(target_id) = target_parent_id {
        let target = get_owned_item(&txn, owner_id, target_id).await?;
        if ItemKind::of(&target)? != ItemKind::Folder {
            return Err(Error::InvalidMove {
                message: "Target parent must be a folder".to_string(),
            });
        }
        ensure_not_descendant(&txn, owner_id, &target, item_id).await?;
    }

    let old_parent_id = model.parent_id;
    let siblings: Vec<item::Model> = list_children(&txn, owner_id, target_parent_id)
        .await?
        .into_iter()
        .filter(|sibling| sibling.id != item_id)
        .collect();

    let sibling_ids: Vec<i64> = siblings.iter().map(|s| s.id).collect();
    let index = insertion_index(&sibling_ids, before_id);

    let mut sequence: Vec<(i64, i32)> = siblings.iter().map(|s| (s.id, s.order)).collect();
    // The moved row is always written, so its current order does not matter here
    sequence.insert(index, (item_id, -1));

    let updates = plan_sibling_orders(&sequence);
    let (moved, others): (Vec<_>, Vec<_>) = updates.into_iter().partition(|(id, _)| *id == item_id);
    write_orders(&txn, &others).await?;

    let new_order = moved.first().map_or(model.order, |(_, order)| *order);
    let mut active: item::ActiveModel = model.into();
    active.parent_id = Set(target_parent_id);
    active.order = Set(new_order);
    let moved = active.update(&txn).await?;

    if old_parent_id != target_parent_id {
        renumber_children(&txn, owner_id, old_parent_id).await?;
    }

    txn.commit().await?;
    tracing::info!(
        "Moved item {} to parent {:?} at position {}",
        item_id,
        target_parent_id,
        moved.order
    );
    Ok(moved)
}

async fn ensure_not_descendant<C>(
    db: &C,
    owner_id: i64,
    target: &item::Model,
    item_id: i64,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let mut seen = HashSet::new();
    let mut current = Some(target.clone());

    while let Some(node) = current {
        if node.id == item_id {
            return Err(Error::InvalidMove {
                message: "Cannot move a folder into itself or its descendants".to_string(),
            });
        }
        if !seen.insert(node.id) {
            return Err(Error::InvalidMove {
                message: "Item hierarchy contains a cycle".to_string(),
            });
        }
        current = match node.parent_id {
            Some(parent_id) => Some(get_owned_item(db, owner_id, parent_id).await?),
            None => None,
        };
    }

    Ok(())
}

/// Ids of an item and everything beneath it.
async fn subtree_ids<C>(db: &C, owner_id: i64, root_id: i64) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    let all = Item::find()
        .filter(item::Column::OwnerId.eq(owner_id))
        .all(db)
        .await?;

    let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
    for model in &all {
        if let Some(parent_id) = model.parent_id {
            children.entry(parent_id).or_default().push(model.id);
        }
    }

    let mut ids = vec![root_id];
    let mut seen: HashSet<i64> = HashSet::from([root_id]);
    let mut cursor = 0;
    while cursor < ids.len() {
        let id = ids[cursor];
        cursor += 1;
        for child in children.get(&id).into_iter().flatten() {
            if seen.insert(*child) {
                ids.push(*child);
            }
        }
    }
    Ok(ids)
}

/// Deletes an item and all its descendants, returning how many rows went away.
///
/// Books pointing at a deleted setting document lose their link and the
/// remaining siblings are renumbered.
pub async fn delete_item(db: &DatabaseConnection, owner_id: i64, item_id: i64) -> Result<u64> {
    let txn = db.begin().await?;
    let model = get_owned_item(&txn, owner_id, item_id).await?;
    let ids = subtree_ids(&txn, owner_id, item_id).await?;

    Item::update_many()
        .col_expr(item::Column::SettingBookId, Expr::value(Option::<i64>::None))
        .filter(item::Column::SettingBookId.is_in(ids.clone()))
        .exec(&txn)
        .await?;

    let deleted = Item::delete_many()
        .filter(item::Column::Id.is_in(ids))
        .exec(&txn)
        .await?
        .rows_affected;

    renumber_children(&txn, owner_id, model.parent_id).await?;
    txn.commit().await?;

    tracing::info!(
        "Deleted item {} ('{}') and {} descendants",
        item_id,
        model.name,
        deleted.saturating_sub(1)
    );
    Ok(deleted)
}

/// Removes every item a user owns.
pub async fn delete_all_for_owner<C>(db: &C, owner_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    Ok(Item::delete_many()
        .filter(item::Column::OwnerId.eq(owner_id))
        .exec(db)
        .await?
        .rows_affected)
}

fn link_of(model: &item::Model, kind: ItemKind) -> ItemLink {
    ItemLink {
        id: model.id,
        name: model.name.clone(),
        kind,
    }
}

/// Loads the editable content of a book or setting document.
pub async fn get_content<C>(db: &C, owner_id: i64, item_id: i64) -> Result<ItemContent>
where
    C: ConnectionTrait,
{
    let model = get_owned_item(db, owner_id, item_id).await?;

    match ItemKind::of(&model)? {
        ItemKind::Book => {
            let associated_setting = match model.setting_book_id {
                Some(setting_id) => Item::find_by_id(setting_id)
                    .filter(item::Column::OwnerId.eq(owner_id))
                    .one(db)
                    .await?
                    .map(|setting| link_of(&setting, ItemKind::Setting)),
                None => None,
            };
            Ok(ItemContent::Book {
                id: model.id,
                name: model.name,
                content: model.content.unwrap_or_default(),
                associated_setting,
            })
        }
        ItemKind::Setting => {
            let book = Item::find()
                .filter(item::Column::OwnerId.eq(owner_id))
                .filter(item::Column::ItemType.eq(ItemKind::Book.as_str()))
                .filter(item::Column::SettingBookId.eq(item_id))
                .order_by_asc(item::Column::Id)
                .one(db)
                .await?;
            let settings = settings_of(&model);
            Ok(ItemContent::Setting {
                id: model.id,
                name: model.name,
                settings,
                associated_book_info: book.map(|book| link_of(&book, ItemKind::Book)),
            })
        }
        ItemKind::Folder => Err(Error::validation("Item is not a book or setting")),
    }
}

/// Replaces the content of a book or setting document.
pub async fn update_content(
    db: &DatabaseConnection,
    owner_id: i64,
    item_id: i64,
    update: ContentUpdate,
) -> Result<item::Model> {
    let model = get_owned_item(db, owner_id, item_id).await?;
    let kind = ItemKind::of(&model)?;

    let mut active: item::ActiveModel = model.into();
    match (kind, update) {
        (ItemKind::Book, ContentUpdate::Book(content)) => active.content = Set(Some(content)),
        (ItemKind::Setting, ContentUpdate::Setting(settings)) => {
            active.settings_data = Set(Some(serde_json::to_value(settings)?));
        }
        (ItemKind::Folder, _) => {
            return Err(Error::validation("Cannot update content for a folder"));
        }
        (kind, _) => {
            return Err(Error::validation(format!(
                "Content does not match the item type '{kind}'"
            )));
        }
    }

    let updated = active.update(db).await?;
    tracing::debug!("Updated content of item {}", item_id);
    Ok(updated)
}

/// Links a book to a setting document, or clears the link with `None`.
pub async fn associate_setting(
    db: &DatabaseConnection,
    owner_id: i64,
    book_id: i64,
    setting_id: Option<i64>,
) -> Result<item::Model> {
    let book = get_owned_item(db, owner_id, book_id).await?;
    if ItemKind::of(&book)? != ItemKind::Book {
        return Err(Error::validation("Target item is not a book"));
    }

    if let Some(setting_id) = setting_id {
        let setting = get_owned_item(db, owner_id, setting_id).await?;
        if ItemKind::of(&setting)? != ItemKind::Setting {
            return Err(Error::validation("Invalid setting book"));
        }
    }

    let mut active: item::ActiveModel = book.into();
    active.setting_book_id = Set(setting_id);
    active.update(db).await.map_err(Into::into)
}

/// Books with no linked setting document, ordered by name.
pub async fn unassociated_books<C>(db: &C, owner_id: i64) -> Result<Vec<item::Model>>
where
    C: ConnectionTrait,
{
    Item::find()
        .filter(item::Column::OwnerId.eq(owner_id))
        .filter(item::Column::ItemType.eq(ItemKind::Book.as_str()))
        .filter(item::Column::SettingBookId.is_null())
        .order_by_asc(item::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}
