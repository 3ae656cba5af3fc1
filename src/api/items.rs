//! Project tree routes.

use super::{ApiState, extract::CurrentUser};
use crate::{
    core::tree::{self, ContentUpdate, ItemContent, ItemKind, ItemLink, ItemView, SettingEntry},
    errors::{Error, Result},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

/// A parent reference as sent by the client: `null`, `"root"`, a number or
/// a numeric string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParentRef(pub Option<i64>);

impl ParentRef {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "root" {
            return Ok(Self(None));
        }
        raw.parse()
            .map(|id| Self(Some(id)))
            .map_err(|_| Error::validation(format!("Invalid parent id: {raw}")))
    }
}

impl<'de> Deserialize<'de> for ParentRef {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Self(None)),
            Value::Number(n) => n
                .as_i64()
                .map(|id| Self(Some(id)))
                .ok_or_else(|| serde::de::Error::custom("parent id must be an integer")),
            Value::String(s) => Self::parse(&s).map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!("invalid parent id: {other}"))),
        }
    }
}

/// `?parent_id=` query.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    parent_id: Option<String>,
}

/// New item body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    name: String,
    #[serde(rename = "type")]
    kind: ItemKind,
    #[serde(default)]
    parent_id: ParentRef,
}

/// Rename body.
#[derive(Debug, Deserialize)]
pub struct RenameBody {
    name: String,
}

/// Move body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveBody {
    #[serde(default)]
    target_parent_id: ParentRef,
    #[serde(default)]
    target_before_id: Option<i64>,
}

/// Folder toggle body.
#[derive(Debug, Deserialize)]
pub struct ToggleBody {
    collapsed: bool,
}

/// Content body; books read `content`, settings read `settings`.
#[derive(Debug, Deserialize)]
pub struct ContentBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    settings: Option<Vec<SettingEntry>>,
}

/// Association body; `null` clears the link.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociateBody {
    setting_book_id: Option<i64>,
}

/// `GET /api/items?parent_id=root|<id>`
pub async fn list_items(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ItemView>>> {
    let parent = match query.parent_id.as_deref() {
        Some(raw) => ParentRef::parse(raw)?,
        None => ParentRef(None),
    };
    let children = tree::list_children(&state.db, caller.id, parent.0).await?;
    let views = children
        .iter()
        .map(ItemView::from_model)
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(views))
}

/// `GET /api/items/tree`
pub async fn get_tree(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<Vec<ItemView>>> {
    Ok(Json(tree::get_tree(&state.db, caller.id).await?))
}

/// `POST /api/items`
pub async fn create_item(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Json(body): Json<CreateBody>,
) -> Result<(StatusCode, Json<ItemView>)> {
    let model = tree::create_item(&state.db, caller.id, &body.name, body.kind, body.parent_id.0).await?;
    Ok((StatusCode::CREATED, Json(ItemView::from_model(&model)?)))
}

/// `DELETE /api/items/:id`
pub async fn delete_item(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(item_id): Path<i64>,
) -> Result<Json<Value>> {
    let deleted = tree::delete_item(&state.db, caller.id, item_id).await?;
    Ok(Json(json!({ "message": format!("Item {item_id} deleted"), "deleted": deleted })))
}

/// `PUT /api/items/:id/rename`
pub async fn rename_item(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(item_id): Path<i64>,
    Json(body): Json<RenameBody>,
) -> Result<Json<ItemView>> {
    let model = tree::rename_item(&state.db, caller.id, item_id, &body.name).await?;
    Ok(Json(ItemView::from_model(&model)?))
}

/// `PUT /api/items/:id/move`
pub async fn move_item(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(item_id): Path<i64>,
    Json(body): Json<MoveBody>,
) -> Result<Json<ItemView>> {
    let model = tree::move_item(
        &state.db,
        caller.id,
        item_id,
        body.target_parent_id.0,
        body.target_before_id,
    )
    .await?;
    Ok(Json(ItemView::from_model(&model)?))
}

/// `PUT /api/items/:id/toggle`
pub async fn toggle_folder(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(item_id): Path<i64>,
    Json(body): Json<ToggleBody>,
) -> Result<Json<ItemView>> {
    let model = tree::toggle_folder(&state.db, caller.id, item_id, body.collapsed).await?;
    Ok(Json(ItemView::from_model(&model)?))
}

/// `GET /api/items/:id/content`
pub async fn get_content(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(item_id): Path<i64>,
) -> Result<Json<ItemContent>> {
    Ok(Json(tree::get_content(&state.db, caller.id, item_id).await?))
}

/// `PUT /api/items/:id/content`
pub async fn update_content(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(item_id): Path<i64>,
    Json(body): Json<ContentBody>,
) -> Result<Json<Value>> {
    let model = tree::get_owned_item(&state.db, caller.id, item_id).await?;
    let update = match ItemKind::of(&model)? {
        ItemKind::Book => ContentUpdate::Book(body.content.unwrap_or_default()),
        ItemKind::Setting => ContentUpdate::Setting(body.settings.ok_or_else(|| {
            Error::validation("Invalid settings format, expected a list of objects")
        })?),
        ItemKind::Folder => return Err(Error::validation("Cannot update content for a folder")),
    };

    tree::update_content(&state.db, caller.id, item_id, update).await?;
    Ok(Json(json!({ "message": format!("Content for item {item_id} updated") })))
}

/// `POST /api/items/:id/associate_setting`
pub async fn associate_setting(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(book_id): Path<i64>,
    Json(body): Json<AssociateBody>,
) -> Result<Json<ItemView>> {
    let model = tree::associate_setting(&state.db, caller.id, book_id, body.setting_book_id).await?;
    Ok(Json(ItemView::from_model(&model)?))
}

/// `GET /api/books/unassociated`
pub async fn unassociated_books(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<Vec<ItemLink>>> {
    let books = tree::unassociated_books(&state.db, caller.id).await?;
    Ok(Json(
        books
            .into_iter()
            .map(|book| ItemLink {
                id: book.id,
                name: book.name,
                kind: ItemKind::Book,
            })
            .collect(),
    ))
}
