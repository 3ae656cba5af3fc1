//! AI service configurations.
//!
//! System services are visible to everyone and managed by administrators.
//! User services are visible to and managed by their owner. At most one
//! system service carries the default flag.

use crate::{
    entities::{AiService, User, ai_service, user},
    errors::{Error, Result},
    provider::ServiceKind,
};
use sea_orm::{
    ActiveValue::NotSet, Condition, ModelTrait, QueryOrder, Set, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use serde::{Deserialize, Serialize};

/// Fields for a new service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewService {
    /// Display name
    pub name: String,
    /// Provider tag, one of [`ServiceKind::ALL`]
    pub service_type: String,
    /// Endpoint base URL
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model identifier
    #[serde(default)]
    pub model_name: Option<String>,
    /// Bearer credential
    #[serde(default)]
    pub api_key: Option<String>,
    /// Stream responses (defaults to on)
    #[serde(default)]
    pub enable_streaming: Option<bool>,
    /// Create a system service (administrators only)
    #[serde(default)]
    pub is_system_service: bool,
}

/// Partial update; blank strings count as absent except for `api_key`,
/// where an empty string clears the key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceUpdate {
    /// New display name
    #[serde(default)]
    pub name: Option<String>,
    /// New provider tag
    #[serde(default)]
    pub service_type: Option<String>,
    /// New base URL
    #[serde(default)]
    pub base_url: Option<String>,
    /// New model identifier
    #[serde(default)]
    pub model_name: Option<String>,
    /// New credential
    #[serde(default)]
    pub api_key: Option<String>,
    /// New streaming flag
    #[serde(default)]
    pub enable_streaming: Option<bool>,
}

/// A service as offered to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableService {
    /// Service id
    pub id: i64,
    /// Stored name
    pub name: String,
    /// Name with a scope marker, e.g. `"GPT-4 (系统)"`
    pub display_name: String,
    /// Provider tag
    pub service_type: String,
    /// Endpoint base URL
    pub base_url: Option<String>,
    /// Model identifier
    pub model_name: Option<String>,
    /// System service flag
    pub is_system_service: bool,
    /// Default system service flag
    pub is_default: bool,
    /// Streaming flag
    pub enable_streaming: bool,
    /// Whether a credential is stored (the credential itself is never returned)
    pub has_api_key: bool,
}

impl From<ai_service::Model> for AvailableService {
    fn from(model: ai_service::Model) -> Self {
        let marker = if model.is_system_service { "(系统)" } else { "(我的)" };
        Self {
            display_name: format!("{} {marker}", model.name),
            has_api_key: model.api_key.as_deref().is_some_and(|key| !key.is_empty()),
            id: model.id,
            name: model.name,
            service_type: model.service_type,
            base_url: model.base_url,
            model_name: model.model_name,
            is_system_service: model.is_system_service,
            is_default: model.is_default,
            enable_streaming: model.enable_streaming,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Finds a service by id.
pub async fn get_service<C>(db: &C, service_id: i64) -> Result<ai_service::Model>
where
    C: ConnectionTrait,
{
    AiService::find_by_id(service_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("AI service", service_id))
}

/// Can `caller` use this service for generation?
#[must_use]
pub fn is_accessible(caller: &user::Model, service: &ai_service::Model) -> bool {
    service.is_system_service || service.owner_id == Some(caller.id)
}

/// Fails with `Forbidden` when the service is not usable by `caller`.
pub fn ensure_accessible(caller: &user::Model, service: &ai_service::Model) -> Result<()> {
    if is_accessible(caller, service) {
        Ok(())
    } else {
        Err(Error::forbidden("You do not have access to this AI service"))
    }
}

fn can_modify(caller: &user::Model, service: &ai_service::Model) -> bool {
    if service.is_system_service {
        caller.is_admin
    } else {
        service.owner_id == Some(caller.id)
    }
}

/// Creates a service owned by `caller`, or a system service for administrators.
pub async fn create_service(
    db: &DatabaseConnection,
    caller: &user::Model,
    input: &NewService,
) -> Result<ai_service::Model> {
    let name = non_blank(Some(&input.name)).ok_or_else(|| Error::validation("Service name is required"))?;
    let kind: ServiceKind = input.service_type.parse()?;
    if input.is_system_service && !caller.is_admin {
        return Err(Error::forbidden("Only administrators can create system services"));
    }

    let model = ai_service::ActiveModel {
        id: NotSet,
        name: Set(name),
        service_type: Set(kind.as_str().to_string()),
        api_key: Set(non_blank(input.api_key.as_deref())),
        base_url: Set(non_blank(input.base_url.as_deref())),
        model_name: Set(non_blank(input.model_name.as_deref())),
        is_system_service: Set(input.is_system_service),
        owner_id: Set(Some(caller.id)),
        is_default: Set(false),
        enable_streaming: Set(input.enable_streaming.unwrap_or(true)),
    }
    .insert(db)
    .await?;

    tracing::info!(
        "User '{}' created {} service '{}' (id {}, {})",
        caller.username,
        if model.is_system_service { "system" } else { "personal" },
        model.name,
        model.id,
        kind
    );
    Ok(model)
}

/// System services followed by the caller's own, each by name.
pub async fn list_available<C>(db: &C, caller: &user::Model) -> Result<Vec<AvailableService>>
where
    C: ConnectionTrait,
{
    let mut services = AiService::find()
        .filter(
            Condition::any()
                .add(ai_service::Column::IsSystemService.eq(true))
                .add(ai_service::Column::OwnerId.eq(caller.id)),
        )
        .order_by_asc(ai_service::Column::Name)
        .all(db)
        .await?;
    services.sort_by_key(|s| !s.is_system_service);
    Ok(services.into_iter().map(AvailableService::from).collect())
}

/// Applies a partial update; at least one field must be given.
pub async fn update_service(
    db: &DatabaseConnection,
    caller: &user::Model,
    service_id: i64,
    update: &ServiceUpdate,
) -> Result<ai_service::Model> {
    let service = get_service(db, service_id).await?;
    if !can_modify(caller, &service) {
        return Err(Error::forbidden("You may not modify this AI service"));
    }

    let mut active: ai_service::ActiveModel = service.into();
    let mut changed = Vec::new();

    if let Some(name) = non_blank(update.name.as_deref()) {
        active.name = Set(name);
        changed.push("name");
    }
    if let Some(tag) = non_blank(update.service_type.as_deref()) {
        let kind: ServiceKind = tag.parse()?;
        active.service_type = Set(kind.as_str().to_string());
        changed.push("service_type");
    }
    if let Some(base_url) = non_blank(update.base_url.as_deref()) {
        active.base_url = Set(Some(base_url));
        changed.push("base_url");
    }
    if let Some(model_name) = non_blank(update.model_name.as_deref()) {
        active.model_name = Set(Some(model_name));
        changed.push("model_name");
    }
    if let Some(api_key) = &update.api_key {
        active.api_key = Set(non_blank(Some(api_key)));
        changed.push("api_key");
    }
    if let Some(enabled) = update.enable_streaming {
        active.enable_streaming = Set(enabled);
        changed.push("enable_streaming");
    }

    if changed.is_empty() {
        return Err(Error::validation("No fields to update"));
    }

    let updated = active.update(db).await?;
    tracing::info!("Updated AI service {} fields {:?}", updated.id, changed);
    Ok(updated)
}

/// Unsets `active_ai_service_id` for every user pointing at a service.
pub async fn clear_active_references<C>(db: &C, service_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    Ok(User::update_many()
        .col_expr(user::Column::ActiveAiServiceId, Expr::value(Option::<i64>::None))
        .filter(user::Column::ActiveAiServiceId.eq(service_id))
        .exec(db)
        .await?
        .rows_affected)
}

/// Deletes a service; owners may delete theirs, administrators any.
pub async fn delete_service(db: &DatabaseConnection, caller: &user::Model, service_id: i64) -> Result<()> {
    let txn = db.begin().await?;
    let service = get_service(&txn, service_id).await?;
    let owns = !service.is_system_service && service.owner_id == Some(caller.id);
    if !caller.is_admin && !owns {
        return Err(Error::forbidden("You may not delete this AI service"));
    }

    let cleared = clear_active_references(&txn, service_id).await?;
    let name = service.name.clone();
    service.delete(&txn).await?;
    txn.commit().await?;

    tracing::info!(
        "User '{}' deleted AI service '{}' ({} users lost it as active service)",
        caller.username,
        name,
        cleared
    );
    Ok(())
}

/// Promotes a user service to a system service; the owner id is kept.
pub async fn make_system(db: &DatabaseConnection, service_id: i64) -> Result<ai_service::Model> {
    let service = get_service(db, service_id).await?;
    if service.is_system_service {
        return Ok(service);
    }

    let mut active: ai_service::ActiveModel = service.into();
    active.is_system_service = Set(true);
    let updated = active.update(db).await?;
    tracing::info!("AI service '{}' (id {}) is now a system service", updated.name, updated.id);
    Ok(updated)
}

/// Marks a system service as the default, clearing any previous default.
pub async fn set_default(db: &DatabaseConnection, service_id: i64) -> Result<ai_service::Model> {
    let txn = db.begin().await?;
    let service = get_service(&txn, service_id).await?;
    if !service.is_system_service {
        return Err(Error::validation("Only system services can be the default"));
    }

    AiService::update_many()
        .col_expr(ai_service::Column::IsDefault, Expr::value(false))
        .filter(ai_service::Column::IsDefault.eq(true))
        .exec(&txn)
        .await?;

    let mut active: ai_service::ActiveModel = service.into();
    active.is_default = Set(true);
    let updated = active.update(&txn).await?;
    txn.commit().await?;

    tracing::info!("AI service '{}' (id {}) is now the default", updated.name, updated.id);
    Ok(updated)
}

/// The default system service, if one is flagged.
pub async fn default_service<C>(db: &C) -> Result<Option<ai_service::Model>>
where
    C: ConnectionTrait,
{
    AiService::find()
        .filter(ai_service::Column::IsSystemService.eq(true))
        .filter(ai_service::Column::IsDefault.eq(true))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Picks the service for a generation request: the explicit id, else the
/// user's active service, else the default system service.
pub async fn resolve_for_user<C>(
    db: &C,
    caller: &user::Model,
    requested: Option<i64>,
) -> Result<ai_service::Model>
where
    C: ConnectionTrait,
{
    let service = match requested.or(caller.active_ai_service_id) {
        Some(id) => get_service(db, id).await?,
        None => default_service(db)
            .await?
            .ok_or_else(|| Error::validation("No AI service selected and no default service configured"))?,
    };
    ensure_accessible(caller, &service)?;
    Ok(service)
}
