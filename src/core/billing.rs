//! Point billing for AI calls.
//!
//! Token usage converts to points by floor division. Deduction and the call
//! log row are written in one transaction. Administrators are never billed.

use crate::{
    entities::{ApiCallLog, User, ai_service, api_call_log, user},
    errors::{Error, Result},
    provider::Usage,
};
use chrono::Utc;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde::Serialize;

/// Tokens that cost one point unless configured otherwise.
pub const DEFAULT_TOKENS_PER_POINT: u64 = 100;

/// Point cost of a token count (floor division).
///
/// A zero ratio costs nothing.
#[must_use]
pub fn points_for_tokens(tokens: u64, tokens_per_point: u64) -> i64 {
    if tokens_per_point == 0 {
        return 0;
    }
    i64::try_from(tokens / tokens_per_point).unwrap_or(i64::MAX)
}

/// Rejects non-admin users without a positive balance.
pub fn ensure_can_generate(user: &user::Model) -> Result<()> {
    if !user.is_admin && user.points <= 0 {
        return Err(Error::InsufficientPoints {
            balance: user.points,
        });
    }
    Ok(())
}

/// Result of billing one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    /// Tokens reported by the service
    pub tokens: u64,
    /// Points taken from the balance
    pub points_deducted: i64,
    /// Balance after the deduction
    pub balance_after: i64,
}

/// Sizes of the exchanged texts, stored with the call log.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallSizes {
    /// Characters in the rendered prompt
    pub prompt_length: usize,
    /// Characters in the generated text
    pub response_length: usize,
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Deducts the cost of a finished call and records it.
///
/// Returns `None` without touching the database for administrators and for
/// calls that reported no tokens.
pub async fn settle_call(
    db: &DatabaseConnection,
    user: &user::Model,
    service: &ai_service::Model,
    usage: Option<Usage>,
    sizes: CallSizes,
    tokens_per_point: u64,
) -> Result<Option<Settlement>> {
    let tokens = usage.map_or(0, |usage| usage.total_tokens);
    if user.is_admin || tokens == 0 {
        tracing::debug!(
            "Skipping billing for user {} ({} tokens, admin: {})",
            user.id,
            tokens,
            user.is_admin
        );
        return Ok(None);
    }

    let cost = points_for_tokens(tokens, tokens_per_point);
    let txn = db.begin().await?;

    User::update_many()
        .col_expr(user::Column::Points, Expr::col(user::Column::Points).sub(cost))
        .filter(user::Column::Id.eq(user.id))
        .exec(&txn)
        .await?;

    api_call_log::ActiveModel {
        user_id: Set(user.id),
        username: Set(user.username.clone()),
        timestamp: Set(Utc::now()),
        ai_service_id: Set(Some(service.id)),
        ai_service_name: Set(service.name.clone()),
        is_system_service: Set(service.is_system_service),
        tokens_consumed: Set(i64::try_from(tokens).unwrap_or(i64::MAX)),
        points_deducted: Set(cost),
        prompt_length: Set(Some(to_i64(sizes.prompt_length))),
        response_length: Set(Some(to_i64(sizes.response_length))),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let balance_after = User::find_by_id(user.id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("user", user.id))?
        .points;

    txn.commit().await?;
    tracing::info!(
        "Billed user {} {} points for {} tokens on '{}', balance now {}",
        user.username,
        cost,
        tokens,
        service.name,
        balance_after
    );

    Ok(Some(Settlement {
        tokens,
        points_deducted: cost,
        balance_after,
    }))
}

/// A user's own call history, newest first.
pub async fn calls_for_user<C>(db: &C, user_id: i64, limit: u64) -> Result<Vec<api_call_log::Model>>
where
    C: ConnectionTrait,
{
    ApiCallLog::find()
        .filter(api_call_log::Column::UserId.eq(user_id))
        .order_by_desc(api_call_log::Column::Timestamp)
        .order_by_desc(api_call_log::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Every user's calls, newest first.
pub async fn all_calls<C>(db: &C, limit: u64) -> Result<Vec<api_call_log::Model>>
where
    C: ConnectionTrait,
{
    ApiCallLog::find()
        .order_by_desc(api_call_log::Column::Timestamp)
        .order_by_desc(api_call_log::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}
