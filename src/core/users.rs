//! Accounts: credentials, points, preferences and removal.

use crate::{
    config::settings::AdminConfig,
    core::{ai_services, app_settings, groups, invitation, tree},
    entities::{AiService, PromptTemplate, User, ai_service, prompt_template, user},
    errors::{Error, Result},
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use sea_orm::{
    ActiveValue::NotSet, ModelTrait, PaginatorTrait, QueryOrder, Set, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use serde::{Deserialize, Serialize};

/// Hashes a password into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::PasswordHash {
            message: e.to_string(),
        })
}

/// Checks a password against a stored PHC string.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Fields for a new account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    /// Login name, trimmed
    pub username: String,
    /// Plain password
    pub password: String,
    /// Optional contact address
    #[serde(default)]
    pub email: Option<String>,
    /// Create an administrator
    #[serde(default)]
    pub is_admin: bool,
    /// Starting balance
    #[serde(default)]
    pub points: i64,
}

/// What the client shows about the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStatus {
    /// User id
    pub id: i64,
    /// Login name
    pub username: String,
    /// Current balance
    pub points: i64,
    /// Administrator flag
    pub is_admin: bool,
    /// Password must be changed before anything else
    pub password_change_required: bool,
    /// Editor auto-save preference
    pub auto_save_on_navigate: bool,
    /// Selected AI service
    pub active_ai_service_id: Option<i64>,
    /// Name of the selected AI service
    pub active_ai_service_name: Option<String>,
    /// Names of the user's groups
    pub groups: Vec<String>,
}

/// Finds a user by id.
pub async fn get_user<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("user", user_id))
}

async fn insert_user<C>(db: &C, input: &NewUser, password_change_required: bool) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let username = input.username.trim();
    if username.is_empty() {
        return Err(Error::validation("Username is required"));
    }
    if input.password.is_empty() {
        return Err(Error::validation("Password is required"));
    }
    if input.points < 0 {
        return Err(Error::validation("Starting points cannot be negative"));
    }

    let taken = User::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await?;
    if taken.is_some() {
        return Err(Error::conflict(format!("Username '{username}' is already taken")));
    }

    let email = input
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_string);

    let model = user::ActiveModel {
        id: NotSet,
        username: Set(username.to_string()),
        email: Set(email),
        password_hash: Set(hash_password(&input.password)?),
        is_admin: Set(input.is_admin),
        password_change_required: Set(password_change_required),
        auto_save_on_navigate: Set(true),
        points: Set(input.points),
        active_ai_service_id: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await?;
    Ok(model)
}

/// Creates an account on behalf of an administrator.
pub async fn create_user(db: &DatabaseConnection, input: &NewUser) -> Result<user::Model> {
    let model = insert_user(db, input, false).await?;
    tracing::info!(
        "Created user '{}' (id {}, admin: {})",
        model.username,
        model.id,
        model.is_admin
    );
    Ok(model)
}

/// Self-registration; redeems the invitation code in the same transaction
/// when invitations are required.
pub async fn register(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
    email: Option<String>,
    invitation_code: Option<&str>,
) -> Result<user::Model> {
    let input = NewUser {
        username: username.to_string(),
        password: password.to_string(),
        email,
        ..Default::default()
    };

    let txn = db.begin().await?;
    if app_settings::invitation_required(&txn).await? {
        let code = invitation_code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| Error::validation("An invitation code is required"))?;
        invitation::redeem(&txn, code, Utc::now()).await?;
    }
    let model = insert_user(&txn, &input, false).await?;
    txn.commit().await?;

    tracing::info!("Registered user '{}' (id {})", model.username, model.id);
    Ok(model)
}

/// All accounts ordered by username.
pub async fn list_users<C>(db: &C) -> Result<Vec<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .order_by_asc(user::Column::Username)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Removes a non-admin account with everything it owns.
pub async fn delete_user(db: &DatabaseConnection, user_id: i64) -> Result<()> {
    let txn = db.begin().await?;
    let model = get_user(&txn, user_id).await?;
    if model.is_admin {
        return Err(Error::forbidden("Administrators cannot be deleted"));
    }

    let items = tree::delete_all_for_owner(&txn, user_id).await?;
    let templates = PromptTemplate::delete_many()
        .filter(prompt_template::Column::UserId.eq(user_id))
        .exec(&txn)
        .await?
        .rows_affected;

    // Promoted services keep their owner id but are no longer the user's
    let owned: Vec<i64> = AiService::find()
        .filter(ai_service::Column::OwnerId.eq(user_id))
        .filter(ai_service::Column::IsSystemService.eq(false))
        .all(&txn)
        .await?
        .into_iter()
        .map(|service| service.id)
        .collect();
    for service_id in &owned {
        ai_services::clear_active_references(&txn, *service_id).await?;
    }
    AiService::delete_many()
        .filter(ai_service::Column::Id.is_in(owned.iter().copied()))
        .exec(&txn)
        .await?;

    groups::remove_user_memberships(&txn, user_id).await?;
    let username = model.username.clone();
    model.delete(&txn).await?;
    txn.commit().await?;

    tracing::info!(
        "Deleted user '{}' with {} items, {} templates and {} services",
        username,
        items,
        templates,
        owned.len()
    );
    Ok(())
}

/// Returns the user when the password matches.
pub async fn verify_credentials<C>(db: &C, username: &str, password: &str) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let rejected = || Error::Unauthorized {
        message: "Invalid username or password".to_string(),
    };

    let model = User::find()
        .filter(user::Column::Username.eq(username.trim()))
        .one(db)
        .await?
        .ok_or_else(rejected)?;

    if verify_password(password, &model.password_hash) {
        Ok(model)
    } else {
        tracing::warn!("Failed login for '{}'", model.username);
        Err(rejected())
    }
}

/// Replaces the password after checking the current one.
pub async fn change_password(
    db: &DatabaseConnection,
    user_id: i64,
    current_password: &str,
    new_password: &str,
) -> Result<user::Model> {
    if new_password.is_empty() {
        return Err(Error::validation("New password is required"));
    }

    let model = get_user(db, user_id).await?;
    if !verify_password(current_password, &model.password_hash) {
        return Err(Error::Unauthorized {
            message: "Current password is incorrect".to_string(),
        });
    }

    let mut active: user::ActiveModel = model.into();
    active.password_hash = Set(hash_password(new_password)?);
    active.password_change_required = Set(false);
    let updated = active.update(db).await?;

    tracing::info!("User '{}' changed their password", updated.username);
    Ok(updated)
}

/// Adds points to a balance.
pub async fn grant_points(db: &DatabaseConnection, user_id: i64, amount: i64) -> Result<user::Model> {
    if amount <= 0 {
        return Err(Error::validation("Points to grant must be positive"));
    }

    let txn = db.begin().await?;
    get_user(&txn, user_id).await?;
    User::update_many()
        .col_expr(user::Column::Points, Expr::col(user::Column::Points).add(amount))
        .filter(user::Column::Id.eq(user_id))
        .exec(&txn)
        .await?;
    let updated = get_user(&txn, user_id).await?;
    txn.commit().await?;

    tracing::info!(
        "Granted {} points to '{}', balance now {}",
        amount,
        updated.username,
        updated.points
    );
    Ok(updated)
}

/// Selects the service used when a request names none; `None` clears it.
pub async fn set_active_ai_service(
    db: &DatabaseConnection,
    user: &user::Model,
    service_id: Option<i64>,
) -> Result<user::Model> {
    if let Some(service_id) = service_id {
        let service = ai_services::get_service(db, service_id).await?;
        ai_services::ensure_accessible(user, &service)?;
    }

    let mut active: user::ActiveModel = get_user(db, user.id).await?.into();
    active.active_ai_service_id = Set(service_id);
    let updated = active.update(db).await?;
    tracing::info!("User '{}' active AI service set to {:?}", updated.username, service_id);
    Ok(updated)
}

/// Stores the auto-save preference.
pub async fn update_auto_save(db: &DatabaseConnection, user_id: i64, enabled: bool) -> Result<user::Model> {
    let mut active: user::ActiveModel = get_user(db, user_id).await?.into();
    active.auto_save_on_navigate = Set(enabled);
    active.update(db).await.map_err(Into::into)
}

/// Balance, flags, active service and group names.
pub async fn user_status<C>(db: &C, user: &user::Model) -> Result<UserStatus>
where
    C: ConnectionTrait,
{
    let active_ai_service_name = match user.active_ai_service_id {
        Some(id) => AiService::find_by_id(id).one(db).await?.map(|s| s.name),
        None => None,
    };

    Ok(UserStatus {
        id: user.id,
        username: user.username.clone(),
        points: user.points,
        is_admin: user.is_admin,
        password_change_required: user.password_change_required,
        auto_save_on_navigate: user.auto_save_on_navigate,
        active_ai_service_id: user.active_ai_service_id,
        active_ai_service_name,
        groups: groups::group_names_for_user(db, user).await?,
    })
}

/// Seeds the bootstrap administrator when no account exists yet.
pub async fn ensure_default_admin(db: &DatabaseConnection, admin: &AdminConfig) -> Result<Option<user::Model>> {
    if User::find().count(db).await? > 0 {
        return Ok(None);
    }

    let input = NewUser {
        username: admin.username.clone(),
        password: admin.password.clone(),
        is_admin: true,
        ..Default::default()
    };
    let model = insert_user(db, &input, true).await?;
    tracing::warn!(
        "Created default administrator '{}'; change its password on first login",
        model.username
    );
    Ok(Some(model))
}
