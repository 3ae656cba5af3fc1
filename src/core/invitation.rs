//! Invitation codes for self-registration.

use crate::{
    entities::{InvitationCode, invitation_code},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{ModelTrait, QueryOrder, Set, prelude::*, sea_query::Expr};
use serde::Deserialize;

/// Fields accepted when creating a code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewInvitation {
    /// Explicit code; a random one is generated when absent or blank
    #[serde(default)]
    pub code: Option<String>,
    /// Number of registrations allowed (defaults to 1)
    #[serde(default)]
    pub max_uses: Option<i32>,
    /// Moment after which the code stops working
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

/// Whether a code can still be redeemed at `now`.
#[must_use]
pub fn is_valid(code: &invitation_code::Model, now: DateTime<Utc>) -> bool {
    if code.times_used >= code.max_uses {
        return false;
    }
    code.expiration_date.is_none_or(|expires| expires >= now)
}

fn random_code() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_ascii_uppercase()
}

/// Creates a code.
pub async fn create_code(
    db: &DatabaseConnection,
    input: &NewInvitation,
) -> Result<invitation_code::Model> {
    let max_uses = input.max_uses.unwrap_or(1);
    if max_uses < 1 {
        return Err(Error::validation("max_uses must be at least 1"));
    }

    let code = input
        .code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map_or_else(random_code, str::to_string);

    let existing = InvitationCode::find()
        .filter(invitation_code::Column::Code.eq(code.as_str()))
        .one(db)
        .await?;
    if existing.is_some() {
        return Err(Error::conflict(format!("Invitation code '{code}' already exists")));
    }

    let model = invitation_code::ActiveModel {
        code: Set(code),
        expiration_date: Set(input.expiration_date),
        max_uses: Set(max_uses),
        times_used: Set(0),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    tracing::info!(
        "Created invitation code {} ({} uses)",
        model.id,
        model.max_uses
    );
    Ok(model)
}

/// All codes, newest first.
pub async fn list_codes<C>(db: &C) -> Result<Vec<invitation_code::Model>>
where
    C: ConnectionTrait,
{
    InvitationCode::find()
        .order_by_desc(invitation_code::Column::CreatedAt)
        .order_by_desc(invitation_code::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Deletes a code.
pub async fn delete_code(db: &DatabaseConnection, code_id: i64) -> Result<()> {
    let model = InvitationCode::find_by_id(code_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("invitation code", code_id))?;
    model.delete(db).await?;
    tracing::info!("Deleted invitation code {}", code_id);
    Ok(())
}

/// Uses up one redemption of a code, failing if it is not valid at `now`.
///
/// Meant to run inside the registration transaction.
pub async fn redeem<C>(db: &C, code: &str, now: DateTime<Utc>) -> Result<invitation_code::Model>
where
    C: ConnectionTrait,
{
    let invalid = || Error::InvalidInvitation {
        code: code.to_string(),
    };

    let model = InvitationCode::find()
        .filter(invitation_code::Column::Code.eq(code.trim()))
        .one(db)
        .await?
        .ok_or_else(invalid)?;
    if !is_valid(&model, now) {
        return Err(invalid());
    }

    // Guarded increment so two registrations cannot both take the last use
    let updated = InvitationCode::update_many()
        .col_expr(
            invitation_code::Column::TimesUsed,
            Expr::col(invitation_code::Column::TimesUsed).add(1),
        )
        .filter(invitation_code::Column::Id.eq(model.id))
        .filter(
            Expr::col(invitation_code::Column::TimesUsed)
                .lt(Expr::col(invitation_code::Column::MaxUses)),
        )
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        return Err(invalid());
    }

    InvitationCode::find_by_id(model.id)
        .one(db)
        .await?
        .ok_or_else(invalid)
}
