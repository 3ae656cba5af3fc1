//! Registration, login and password changes.

use super::{ApiState, extract::CurrentUser};
use crate::{core::users, entities::user, errors::Result};
use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

/// Self-registration body.
#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    username: String,
    password: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    invitation_code: Option<String>,
}

/// Login body.
#[derive(Debug, Deserialize)]
pub struct LoginBody {
    username: String,
    password: String,
}

/// Password change body.
#[derive(Debug, Deserialize)]
pub struct PasswordBody {
    current_password: String,
    new_password: String,
}

/// `POST /api/auth/register`
pub async fn register(
    State(state): State<ApiState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<user::Model>)> {
    let model = users::register(
        &state.db,
        &body.username,
        &body.password,
        body.email,
        body.invitation_code.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(model)))
}

/// `POST /api/auth/login`; returns the user whose id the client then sends
/// in the identity header.
pub async fn login(
    State(state): State<ApiState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<user::Model>> {
    let model = users::verify_credentials(&state.db, &body.username, &body.password).await?;
    tracing::info!("User '{}' logged in", model.username);
    Ok(Json(model))
}

/// `PUT /api/auth/password`
pub async fn change_password(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Json(body): Json<PasswordBody>,
) -> Result<Json<user::Model>> {
    let model =
        users::change_password(&state.db, caller.id, &body.current_password, &body.new_password)
            .await?;
    Ok(Json(model))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use crate::api::test_support::*;
    use crate::core::app_settings;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_register_login_and_change_password() {
        let state = test_state().await;
        app_settings::set_setting(&state.db, app_settings::INVITATION_REQUIRED_KEY, "false")
            .await
            .unwrap();

        let (status, created) = call(
            &state,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "writer", "password": "pw1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.get("password_hash").is_none());
        let id = created["id"].as_i64().unwrap();

        let (status, _) = call(
            &state,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": "writer", "password": "wrong"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &state,
            Method::PUT,
            "/api/auth/password",
            Some(id),
            Some(json!({"current_password": "pw1", "new_password": "pw2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": "writer", "password": "pw2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id);
    }

    #[tokio::test]
    async fn test_register_without_code_is_rejected() {
        let state = test_state().await;
        let (status, _) = call(
            &state,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "writer", "password": "pw", "invitation_code": "NOPE"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
