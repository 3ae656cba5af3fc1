//! Administrator routes: invitation codes, subscriptions, audit views and
//! runtime settings.

use super::{ApiState, extract::AdminUser, users::LimitQuery};
use crate::{
    core::{
        app_settings, billing,
        distribution_log::{self, DistributionLogEntry},
        invitation::{self, NewInvitation},
        subscription::{self, SubscriptionInput, SubscriptionView},
    },
    entities::{api_call_log, invitation_code},
    errors::{Error, Result},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Invitation code as listed, with its current validity.
#[derive(Debug, Serialize)]
pub struct InvitationView {
    /// Stored code
    #[serde(flatten)]
    pub code: invitation_code::Model,
    /// Whether it can still be redeemed
    pub is_valid: bool,
}

impl From<invitation_code::Model> for InvitationView {
    fn from(code: invitation_code::Model) -> Self {
        Self {
            is_valid: invitation::is_valid(&code, Utc::now()),
            code,
        }
    }
}

/// Setting value as read or written.
#[derive(Debug, Serialize, Deserialize)]
pub struct SettingValue {
    /// Stored value, absent if never written
    pub value: Option<String>,
}

/// `GET /api/invitation-codes`
pub async fn list_invitation_codes(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<InvitationView>>> {
    let codes = invitation::list_codes(&state.db).await?;
    Ok(Json(codes.into_iter().map(InvitationView::from).collect()))
}

/// `POST /api/invitation-codes`
pub async fn create_invitation_code(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Json(body): Json<NewInvitation>,
) -> Result<(StatusCode, Json<InvitationView>)> {
    let code = invitation::create_code(&state.db, &body).await?;
    Ok((StatusCode::CREATED, Json(code.into())))
}

/// `DELETE /api/invitation-codes/:id`
pub async fn delete_invitation_code(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(code_id): Path<i64>,
) -> Result<StatusCode> {
    invitation::delete_code(&state.db, code_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/subscriptions`
pub async fn list_subscriptions(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<SubscriptionView>>> {
    Ok(Json(subscription::list_subscriptions(&state.db).await?))
}

/// `POST /api/subscriptions`
pub async fn create_subscription(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Json(body): Json<SubscriptionInput>,
) -> Result<(StatusCode, Json<SubscriptionView>)> {
    let view = subscription::create_subscription(&state.db, &body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `PUT /api/subscriptions/:id`
pub async fn update_subscription(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(config_id): Path<i64>,
    Json(body): Json<SubscriptionInput>,
) -> Result<Json<SubscriptionView>> {
    Ok(Json(
        subscription::update_subscription(&state.db, config_id, &body).await?,
    ))
}

/// `DELETE /api/subscriptions/:id`
pub async fn delete_subscription(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(config_id): Path<i64>,
) -> Result<StatusCode> {
    subscription::delete_subscription(&state.db, config_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/admin/calls`
pub async fn all_calls(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<api_call_log::Model>>> {
    Ok(Json(billing::all_calls(&state.db, query.get()).await?))
}

/// `GET /api/admin/distribution-log`, newest entries first.
pub async fn distribution_log(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<DistributionLogEntry>>> {
    let path = state.config.scheduler.distribution_log_path.clone();
    let mut entries = tokio::task::spawn_blocking(move || distribution_log::read_entries(&path))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    entries.reverse();
    Ok(Json(entries))
}

/// `GET /api/admin/settings/:key`
pub async fn get_setting(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(key): Path<String>,
) -> Result<Json<SettingValue>> {
    if !app_settings::KNOWN_KEYS.contains(&key.as_str()) {
        return Err(Error::not_found("setting", key));
    }
    let value = app_settings::get_setting(&state.db, &key).await?;
    Ok(Json(SettingValue { value }))
}

/// `PUT /api/admin/settings/:key`
pub async fn put_setting(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(key): Path<String>,
    Json(body): Json<SettingValue>,
) -> Result<Json<SettingValue>> {
    let value = body
        .value
        .ok_or_else(|| Error::validation("A value is required"))?;
    let saved = app_settings::set_setting(&state.db, &key, &value).await?;
    Ok(Json(SettingValue {
        value: Some(saved.value),
    }))
}
