//! Prompt template routes.

use super::{
    ApiState,
    extract::{AdminUser, CurrentUser},
};
use crate::{
    core::prompts::{self, NewTemplate, OwnedTemplate, TemplateUpdate},
    entities::prompt_template,
    errors::Result,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// `GET /api/prompt-templates`
pub async fn list_templates(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<Vec<prompt_template::Model>>> {
    Ok(Json(prompts::list_visible(&state.db, &caller).await?))
}

/// `POST /api/prompt-templates`
pub async fn create_template(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Json(body): Json<NewTemplate>,
) -> Result<(StatusCode, Json<prompt_template::Model>)> {
    let model = prompts::create_template(&state.db, &caller, &body).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

/// `GET /api/prompt-templates/:id`
pub async fn get_template(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(template_id): Path<i64>,
) -> Result<Json<prompt_template::Model>> {
    Ok(Json(prompts::get_visible(&state.db, &caller, template_id).await?))
}

/// `PUT /api/prompt-templates/:id`
pub async fn update_template(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(template_id): Path<i64>,
    Json(body): Json<TemplateUpdate>,
) -> Result<Json<prompt_template::Model>> {
    Ok(Json(
        prompts::update_template(&state.db, &caller, template_id, &body).await?,
    ))
}

/// `DELETE /api/prompt-templates/:id`
pub async fn delete_template(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Path(template_id): Path<i64>,
) -> Result<StatusCode> {
    prompts::delete_template(&state.db, &caller, template_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/admin/user-prompt-templates`
pub async fn admin_user_templates(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<OwnedTemplate>>> {
    Ok(Json(prompts::admin_list_user_templates(&state.db).await?))
}
