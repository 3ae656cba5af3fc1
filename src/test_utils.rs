//! Shared test utilities.
//!
//! This module provides helpers that set up an in-memory database and create
//! users, tree items and AI services with sensible defaults.

use crate::{
    core::tree::{self, ItemKind},
    entities::{ai_service, item, user},
    errors::Result,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::NotSet, DatabaseConnection, Set};

/// Placeholder stored instead of a real hash; it never verifies.
pub const UNUSABLE_PASSWORD_HASH: &str = "!test";

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Inserts a user directly, skipping password hashing.
///
/// # Defaults
/// * `email`: None
/// * `password_change_required`: false
/// * `auto_save_on_navigate`: true
/// * `active_ai_service_id`: None
pub async fn create_custom_user(
    db: &DatabaseConnection,
    username: &str,
    is_admin: bool,
    points: i64,
) -> Result<user::Model> {
    user::ActiveModel {
        id: NotSet,
        username: Set(username.to_string()),
        email: Set(None),
        password_hash: Set(UNUSABLE_PASSWORD_HASH.to_string()),
        is_admin: Set(is_admin),
        password_change_required: Set(false),
        auto_save_on_navigate: Set(true),
        points: Set(points),
        active_ai_service_id: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates a regular user with a zero balance.
pub async fn create_test_user(db: &DatabaseConnection, username: &str) -> Result<user::Model> {
    create_custom_user(db, username, false, 0).await
}

/// Creates a regular user with the given balance.
pub async fn create_test_user_with_points(
    db: &DatabaseConnection,
    username: &str,
    points: i64,
) -> Result<user::Model> {
    create_custom_user(db, username, false, points).await
}

/// Creates an administrator with a zero balance.
pub async fn create_test_admin(db: &DatabaseConnection, username: &str) -> Result<user::Model> {
    create_custom_user(db, username, true, 0).await
}

/// Creates a folder at the end of `parent`'s children.
pub async fn create_test_folder(
    db: &DatabaseConnection,
    owner_id: i64,
    name: &str,
    parent_id: Option<i64>,
) -> Result<item::Model> {
    tree::create_item(db, owner_id, name, ItemKind::Folder, parent_id).await
}

/// Creates a book at the end of `parent`'s children.
pub async fn create_test_book(
    db: &DatabaseConnection,
    owner_id: i64,
    name: &str,
    parent_id: Option<i64>,
) -> Result<item::Model> {
    tree::create_item(db, owner_id, name, ItemKind::Book, parent_id).await
}

/// Creates an empty setting document at the end of `parent`'s children.
pub async fn create_test_setting(
    db: &DatabaseConnection,
    owner_id: i64,
    name: &str,
    parent_id: Option<i64>,
) -> Result<item::Model> {
    tree::create_item(db, owner_id, name, ItemKind::Setting, parent_id).await
}

/// Creates an OpenAI-schema service pointing at `base_url`.
///
/// A system service when `owner_id` is None, otherwise owned by that user.
///
/// # Defaults
/// * `service_type`: "openai"
/// * `model_name`: "test-model"
/// * `api_key`: "sk-test"
/// * `enable_streaming`: false
pub async fn create_test_service(
    db: &DatabaseConnection,
    owner_id: Option<i64>,
    base_url: &str,
) -> Result<ai_service::Model> {
    let name = match owner_id {
        Some(owner) => format!("Service of {owner}"),
        None => format!("System {base_url}"),
    };
    ai_service::ActiveModel {
        id: NotSet,
        name: Set(name),
        service_type: Set("openai".to_string()),
        api_key: Set(Some("sk-test".to_string())),
        base_url: Set(Some(base_url.to_string())),
        model_name: Set(Some("test-model".to_string())),
        is_system_service: Set(owner_id.is_none()),
        owner_id: Set(owner_id),
        is_default: Set(false),
        enable_streaming: Set(false),
    }
    .insert(db)
    .await
    .map_err(Into::into)
}
