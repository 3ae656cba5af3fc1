//! Runtime switches stored as key/value rows.
//!
//! Same upsert pattern as a state table: read a key, create it on first
//! write, update it afterwards.

use crate::{
    entities::{AppSetting, app_setting},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, prelude::*};

/// Whether self-registration requires an invitation code.
pub const INVITATION_REQUIRED_KEY: &str = "invitation_required";

/// Keys administrators may read and change.
pub const KNOWN_KEYS: [&str; 1] = [INVITATION_REQUIRED_KEY];

/// Value of a setting, if it was ever written.
pub async fn get_setting<C>(db: &C, key: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    Ok(AppSetting::find()
        .filter(app_setting::Column::Key.eq(key))
        .one(db)
        .await?
        .map(|setting| setting.value))
}

/// Creates or updates a setting.
pub async fn set_setting<C>(db: &C, key: &str, value: &str) -> Result<app_setting::Model>
where
    C: ConnectionTrait,
{
    if !KNOWN_KEYS.contains(&key) {
        return Err(Error::validation(format!("Unknown setting: {key}")));
    }

    let existing = AppSetting::find()
        .filter(app_setting::Column::Key.eq(key))
        .one(db)
        .await?;

    let saved = if let Some(setting) = existing {
        let mut active: app_setting::ActiveModel = setting.into();
        active.value = Set(value.to_string());
        active.updated_at = Set(Utc::now().naive_utc());
        active.update(db).await?
    } else {
        app_setting::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            updated_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        }
        .insert(db)
        .await?
    };

    tracing::info!("Setting '{}' is now '{}'", key, value);
    Ok(saved)
}

/// Parses a stored flag; anything unrecognised falls back to `default`.
#[must_use]
pub fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1" | "yes" | "on") => true,
        Some("false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

/// Whether registration needs an invitation code (default: yes).
pub async fn invitation_required<C>(db: &C) -> Result<bool>
where
    C: ConnectionTrait,
{
    let value = get_setting(db, INVITATION_REQUIRED_KEY).await?;
    Ok(parse_flag(value.as_deref(), true))
}
