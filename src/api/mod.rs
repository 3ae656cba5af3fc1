//! HTTP JSON API.
//!
//! All routes live under `/api`. Handlers parse the request, call into
//! [`crate::core`] and serialize the result; errors become `{"error": ...}`
//! bodies through [`crate::errors::Error`]'s `IntoResponse` impl.

pub mod admin;
pub mod ai_services;
pub mod auth;
pub mod error;
pub mod extract;
pub mod generate;
pub mod groups;
pub mod items;
pub mod prompts;
pub mod users;

use crate::{config::AppConfig, errors::Result, provider::AiClient};
use axum::{
    Json, Router,
    routing::{delete, get, post, put},
};
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    /// Database pool
    pub db: DatabaseConnection,
    /// Outbound AI client
    pub client: AiClient,
    /// Loaded configuration
    pub config: Arc<AppConfig>,
}

impl ApiState {
    /// Builds the state from a connection and configuration.
    #[must_use]
    pub fn new(db: DatabaseConnection, config: AppConfig) -> Self {
        Self {
            db,
            client: AiClient::new(config.ai.request_timeout()),
            config: Arc::new(config),
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Every route of the service.
pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        // auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/password", put(auth::change_password))
        // tree
        .route("/items", get(items::list_items).post(items::create_item))
        .route("/items/tree", get(items::get_tree))
        .route("/items/:id", delete(items::delete_item))
        .route("/items/:id/rename", put(items::rename_item))
        .route("/items/:id/move", put(items::move_item))
        .route("/items/:id/toggle", put(items::toggle_folder))
        .route(
            "/items/:id/content",
            get(items::get_content).put(items::update_content),
        )
        .route("/items/:id/associate_setting", post(items::associate_setting))
        .route("/books/unassociated", get(items::unassociated_books))
        // current user
        .route("/user/status", get(users::status))
        .route("/user/settings", put(users::update_settings))
        .route(
            "/user/settings/active-ai-service",
            put(users::set_active_ai_service),
        )
        .route("/user/calls", get(users::my_calls))
        // user administration
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/:id", delete(users::delete_user))
        .route("/user/:id/grant_points", post(users::grant_points))
        // groups
        .route("/groups", get(groups::list_groups).post(groups::create_group))
        .route("/groups/:id", delete(groups::delete_group))
        .route(
            "/groups/:id/users",
            get(groups::list_members).post(groups::add_member),
        )
        .route("/groups/:id/users/:user_id", delete(groups::remove_member))
        // prompt templates
        .route(
            "/prompt-templates",
            get(prompts::list_templates).post(prompts::create_template),
        )
        .route(
            "/prompt-templates/:id",
            get(prompts::get_template)
                .put(prompts::update_template)
                .delete(prompts::delete_template),
        )
        .route(
            "/admin/user-prompt-templates",
            get(prompts::admin_user_templates),
        )
        // AI services
        .route("/ai-services", post(ai_services::create_service))
        .route("/ai-services/available", get(ai_services::list_available))
        .route(
            "/ai-services/:id",
            put(ai_services::update_service).delete(ai_services::delete_service),
        )
        .route("/ai-services/:id/make-system", put(ai_services::make_system))
        .route("/ai-services/:id/make-default", put(ai_services::make_default))
        // generation
        .route("/generate-with-template", post(generate::generate_with_template))
        // administration
        .route(
            "/invitation-codes",
            get(admin::list_invitation_codes).post(admin::create_invitation_code),
        )
        .route("/invitation-codes/:id", delete(admin::delete_invitation_code))
        .route(
            "/subscriptions",
            get(admin::list_subscriptions).post(admin::create_subscription),
        )
        .route(
            "/subscriptions/:id",
            put(admin::update_subscription).delete(admin::delete_subscription),
        )
        .route("/admin/calls", get(admin::all_calls))
        .route("/admin/distribution-log", get(admin::distribution_log))
        .route(
            "/admin/settings/:key",
            get(admin::get_setting).put(admin::put_setting),
        );

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn serve<F>(state: ApiState, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let address = state.config.server.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::setup_test_db;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    pub async fn test_state() -> ApiState {
        ApiState::new(setup_test_db().await.unwrap(), AppConfig::default())
    }

    /// Sends one request through the router; returns status and parsed JSON
    /// (`Value::Null` for an empty body).
    pub async fn call(
        state: &ApiState,
        method: Method,
        uri: &str,
        user_id: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, text) = call_raw(state, method, uri, user_id, body).await;
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap()
        };
        (status, value)
    }

    /// Same as [`call`] but returns the raw body text.
    pub async fn call_raw(
        state: &ApiState,
        method: Method,
        uri: &str,
        user_id: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = user_id {
            builder = builder.header(extract::USER_ID_HEADER, id.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }
}
