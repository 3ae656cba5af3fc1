//! AI service configuration routes.

use super::{
    ApiState,
    extract::{AdminUser, CurrentUser},
};
use crate::{
    core::ai_services::{self, AvailableService, NewService, ServiceUpdate},
    errors::Result,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};

/// `POST /api/ai-services`
pub async fn create_service(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Json(body): Json<NewService>,
) -> Result<(StatusCode, Json<AvailableService>)> {
    let model = ai_services::create_service(&state.db, &caller, &body).await?;
    Ok((StatusCode::CREATED, Json(model.into())))
}

/// `GET /api/ai-services/available`
pub async fn list_available(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<Vec<AvailableService>>> {
    Ok(Json(ai_services::list_available(&state.db, &caller).await?))
}

/// `PUT /api/ai-services/:id`
pub async fn update_service(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(service_id): Path<i64>,
    Json(body): Json<ServiceUpdate>,
) -> Result<Json<AvailableService>> {
    let model = ai_services::update_service(&state.db, &caller, service_id, &body).await?;
    Ok(Json(model.into()))
}

/// `DELETE /api/ai-services/:id`
pub async fn delete_service(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(service_id): Path<i64>,
) -> Result<Json<Value>> {
    ai_services::delete_service(&state.db, &caller, service_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// `PUT /api/ai-services/:id/make-system`
pub async fn make_system(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(service_id): Path<i64>,
) -> Result<Json<AvailableService>> {
    Ok(Json(ai_services::make_system(&state.db, service_id).await?.into()))
}

/// `PUT /api/ai-services/:id/make-default`
pub async fn make_default(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(service_id): Path<i64>,
) -> Result<Json<AvailableService>> {
    Ok(Json(ai_services::set_default(&state.db, service_id).await?.into()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use crate::{api::test_support::*, test_utils::*};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_service_routes_hide_credentials() {
        let state = test_state().await;
        let admin = create_test_admin(&state.db, "boss").await.unwrap();
        let user = create_test_user(&state.db, "writer").await.unwrap();

        let (status, created) = call(
            &state,
            Method::POST,
            "/api/ai-services",
            Some(user.id),
            Some(json!({
                "name": "Local",
                "service_type": "ollama",
                "base_url": "http://localhost:11434",
                "model_name": "qwen2",
                "api_key": "secret-key"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["enable_streaming"], true);
        assert_eq!(created["has_api_key"], true);
        assert!(created.get("api_key").is_none());
        let id = created["id"].as_i64().unwrap();

        let (_, listed) = call(&state, Method::GET, "/api/ai-services/available", Some(user.id), None).await;
        assert_eq!(listed[0]["display_name"], "Local (我的)");
        assert!(!listed.to_string().contains("secret-key"));

        let (status, _) = call(
            &state,
            Method::PUT,
            &format!("/api/ai-services/{id}/make-system"),
            Some(user.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, promoted) = call(
            &state,
            Method::PUT,
            &format!("/api/ai-services/{id}/make-system"),
            Some(admin.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(promoted["display_name"], "Local (系统)");

        let (status, default) = call(
            &state,
            Method::PUT,
            &format!("/api/ai-services/{id}/make-default"),
            Some(admin.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(default["is_default"], true);
    }
}
