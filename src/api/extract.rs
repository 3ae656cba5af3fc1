//! Caller identity extractors.
//!
//! The caller is named by the `x-user-id` header. The row is loaded fresh on
//! every request so balances and flags are current.

use super::ApiState;
use crate::{core::users, entities::user, errors::Error};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Any signed-in user.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub user::Model);

/// A signed-in administrator.
#[derive(Debug, Clone)]
pub struct AdminUser(pub user::Model);

fn unauthorized(message: &str) -> Error {
    Error::Unauthorized {
        message: message.to_string(),
    }
}

#[async_trait]
impl FromRequestParts<ApiState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| unauthorized("Login required"))?;
        let user_id: i64 = raw
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| unauthorized("Malformed user id"))?;

        match users::get_user(&state.db, user_id).await {
            Ok(model) => Ok(Self(model)),
            Err(Error::NotFound { .. }) => Err(unauthorized("Unknown user")),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl FromRequestParts<ApiState> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let CurrentUser(model) = CurrentUser::from_request_parts(parts, state).await?;
        if model.is_admin {
            Ok(Self(model))
        } else {
            Err(Error::forbidden("Administrator privileges required"))
        }
    }
}
