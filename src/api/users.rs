//! Account routes: the caller's own status and settings, plus user
//! administration.

use super::{
    ApiState,
    extract::{AdminUser, CurrentUser},
};
use crate::{
    core::{
        billing,
        users::{self, NewUser, UserStatus},
    },
    entities::{api_call_log, user},
    errors::Result,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

/// Default page size for call history.
const DEFAULT_CALL_LIMIT: u64 = 100;

/// User preference body.
#[derive(Debug, Deserialize)]
pub struct SettingsBody {
    #[serde(default)]
    auto_save_on_navigate: Option<bool>,
}

/// Active service body; `null` clears the selection.
#[derive(Debug, Deserialize)]
pub struct ActiveServiceBody {
    config_id: Option<i64>,
}

/// Grant body.
#[derive(Debug, Deserialize)]
pub struct GrantBody {
    points: i64,
}

/// `?limit=` query.
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    limit: Option<u64>,
}

impl LimitQuery {
    pub(crate) fn get(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_CALL_LIMIT).clamp(1, 1000)
    }
}

/// `GET /api/user/status`
pub async fn status(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<UserStatus>> {
    Ok(Json(users::user_status(&state.db, &caller).await?))
}

/// `PUT /api/user/settings`
pub async fn update_settings(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Json(body): Json<SettingsBody>,
) -> Result<Json<Value>> {
    match body.auto_save_on_navigate {
        Some(enabled) => {
            users::update_auto_save(&state.db, caller.id, enabled).await?;
            Ok(Json(json!({ "success": true, "message": "Settings updated" })))
        }
        None => Ok(Json(json!({ "success": true, "message": "No settings were updated" }))),
    }
}

/// `PUT /api/user/settings/active-ai-service`
pub async fn set_active_ai_service(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Json(body): Json<ActiveServiceBody>,
) -> Result<Json<UserStatus>> {
    let updated = users::set_active_ai_service(&state.db, &caller, body.config_id).await?;
    Ok(Json(users::user_status(&state.db, &updated).await?))
}

/// `GET /api/user/calls`
pub async fn my_calls(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<api_call_log::Model>>> {
    Ok(Json(billing::calls_for_user(&state.db, caller.id, query.get()).await?))
}

/// `GET /api/users`
pub async fn list_users(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<user::Model>>> {
    Ok(Json(users::list_users(&state.db).await?))
}

/// `POST /api/users`
pub async fn create_user(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Json(body): Json<NewUser>,
) -> Result<(StatusCode, Json<user::Model>)> {
    let model = users::create_user(&state.db, &body).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

/// `DELETE /api/users/:id`
pub async fn delete_user(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(user_id): Path<i64>,
) -> Result<StatusCode> {
    users::delete_user(&state.db, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/user/:id/grant_points`
pub async fn grant_points(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(user_id): Path<i64>,
    Json(body): Json<GrantBody>,
) -> Result<Json<Value>> {
    let updated = users::grant_points(&state.db, user_id, body.points).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Granted {} points to {}", body.points, updated.username),
        "new_balance": updated.points,
    })))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use crate::{api::test_support::*, test_utils::*};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_admin_routes_reject_regular_users() {
        let state = test_state().await;
        let user = create_test_user(&state.db, "writer").await.unwrap();

        let (status, _) = call(&state, Method::GET, "/api/users", Some(user.id), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &state,
            Method::POST,
            &format!("/api/user/{}/grant_points", user.id),
            Some(user.id),
            Some(json!({"points": 50})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_grant_and_status() {
        let state = test_state().await;
        let admin = create_test_admin(&state.db, "boss").await.unwrap();
        let user = create_test_user(&state.db, "writer").await.unwrap();

        let (status, body) = call(
            &state,
            Method::POST,
            &format!("/api/user/{}/grant_points", user.id),
            Some(admin.id),
            Some(json!({"points": 50})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["new_balance"], 50);

        let (status, _) = call(
            &state,
            Method::POST,
            &format!("/api/user/{}/grant_points", user.id),
            Some(admin.id),
            Some(json!({"points": -5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, status_body) = call(&state, Method::GET, "/api/user/status", Some(user.id), None).await;
        assert_eq!(status_body["points"], 50);
        assert_eq!(status_body["is_admin"], false);
    }

    #[tokio::test]
    async fn test_create_and_delete_user() {
        let state = test_state().await;
        let admin = create_test_admin(&state.db, "boss").await.unwrap();

        let (status, created) = call(
            &state,
            Method::POST,
            "/api/users",
            Some(admin.id),
            Some(json!({"username": "fresh", "password": "pw", "points": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_i64().unwrap();

        let (status, _) = call(&state, Method::DELETE, &format!("/api/users/{id}"), Some(admin.id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(
            &state,
            Method::DELETE,
            &format!("/api/users/{}", admin.id),
            Some(admin.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
