//! Group administration routes.

use super::{ApiState, extract::AdminUser};
use crate::{
    core::groups::{self, GroupSummary, MembershipChange},
    entities::{group, user},
    errors::Result,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

/// New group body.
#[derive(Debug, Deserialize)]
pub struct GroupBody {
    name: String,
}

/// Add-member body.
#[derive(Debug, Deserialize)]
pub struct MemberBody {
    username: String,
}

/// `GET /api/groups`
pub async fn list_groups(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<GroupSummary>>> {
    Ok(Json(groups::list_groups(&state.db).await?))
}

/// `POST /api/groups`
pub async fn create_group(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Json(body): Json<GroupBody>,
) -> Result<(StatusCode, Json<group::Model>)> {
    let model = groups::create_group(&state.db, &body.name).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

/// `DELETE /api/groups/:id`
pub async fn delete_group(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(group_id): Path<i64>,
) -> Result<StatusCode> {
    groups::delete_group(&state.db, group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/groups/:id/users`
pub async fn list_members(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(group_id): Path<i64>,
) -> Result<Json<Vec<user::Model>>> {
    Ok(Json(groups::list_members(&state.db, group_id).await?))
}

/// `POST /api/groups/:id/users`
pub async fn add_member(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path(group_id): Path<i64>,
    Json(body): Json<MemberBody>,
) -> Result<(StatusCode, Json<Value>)> {
    let (status, reply) = match groups::add_member(&state.db, group_id, &body.username).await? {
        MembershipChange::Added(member) => (
            StatusCode::CREATED,
            json!({ "success": true, "user_id": member.id, "message": format!("Added {}", member.username) }),
        ),
        MembershipChange::AlreadyMember(member) => (
            StatusCode::OK,
            json!({ "success": true, "user_id": member.id, "message": format!("{} is already a member", member.username) }),
        ),
    };
    Ok((status, Json(reply)))
}

/// `DELETE /api/groups/:id/users/:user_id`
pub async fn remove_member(
    State(state): State<ApiState>,
    AdminUser(_): AdminUser,
    Path((group_id, user_id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    groups::remove_member(&state.db, group_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
