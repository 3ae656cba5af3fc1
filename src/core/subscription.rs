//! Scheduled subscription point grants.
//!
//! A config fires when the current minute matches its time of day, the day
//! matches its frequency, and the slot was not already processed today. A
//! whole tick is one transaction; the audit log is written only after commit.

use crate::{
    core::distribution_log::{self, DistributionLogEntry},
    entities::{
        Group, SubscriptionConfig, SubscriptionConfigGroup, User, group, subscription_config,
        subscription_config_group, user,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, Timelike, Utc};
use sea_orm::{
    ModelTrait, QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How often a config fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every day
    Daily,
    /// One weekday, 0 = Monday
    Weekly,
    /// One day of the month, 1..=31
    Monthly,
}

impl Frequency {
    /// Stored tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(Error::validation(format!(
                "Invalid distribution frequency: {other}"
            ))),
        }
    }
}

/// Whether a config should fire at `now` (UTC).
#[must_use]
pub fn is_due(config: &subscription_config::Model, now: NaiveDateTime) -> bool {
    if !config.is_active {
        return false;
    }

    let slot = config.distribution_time;
    if now.hour() != slot.hour() || now.minute() != slot.minute() {
        return false;
    }

    let day_matches = match config.distribution_frequency.parse::<Frequency>() {
        Ok(Frequency::Daily) => true,
        Ok(Frequency::Weekly) => config
            .distribution_day
            .is_some_and(|day| i64::from(day) == i64::from(now.weekday().num_days_from_monday())),
        Ok(Frequency::Monthly) => config
            .distribution_day
            .is_some_and(|day| i64::from(day) == i64::from(now.day())),
        Err(_) => false,
    };
    if !day_matches {
        return false;
    }

    !config.last_processed_at.is_some_and(|last| {
        last.date() == now.date() && last.hour() == slot.hour() && last.minute() == slot.minute()
    })
}

/// Grants points for every due config in one transaction.
///
/// A user in several target groups of the same config is granted once per
/// group. Returns one log entry per grant.
pub async fn process_due_subscriptions(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
) -> Result<Vec<DistributionLogEntry>> {
    let naive_now = now.naive_utc();
    let txn = db.begin().await?;

    let configs = SubscriptionConfig::find()
        .filter(subscription_config::Column::IsActive.eq(true))
        .order_by_asc(subscription_config::Column::Id)
        .all(&txn)
        .await?;

    let mut entries = Vec::new();
    for config in configs {
        if !is_due(&config, naive_now) {
            tracing::debug!("Subscription '{}' is not due", config.name);
            continue;
        }

        let groups = config
            .find_related(Group)
            .order_by_asc(group::Column::Id)
            .all(&txn)
            .await?;
        if groups.is_empty() {
            tracing::warn!("Subscription '{}' has no target groups", config.name);
        }

        let points = config.points_to_distribute;
        for target in &groups {
            let members = target
                .find_related(User)
                .order_by_asc(user::Column::Id)
                .all(&txn)
                .await?;

            for member in members {
                User::update_many()
                    .col_expr(user::Column::Points, Expr::col(user::Column::Points).add(points))
                    .filter(user::Column::Id.eq(member.id))
                    .exec(&txn)
                    .await?;
                let balance_after = User::find_by_id(member.id)
                    .one(&txn)
                    .await?
                    .map_or(member.points + points, |u| u.points);

                tracing::debug!(
                    "Granted {} points to '{}' via group '{}'",
                    points,
                    member.username,
                    target.name
                );
                entries.push(DistributionLogEntry {
                    timestamp: now,
                    subscription_config_id: config.id,
                    subscription_config_name: config.name.clone(),
                    target_group_id: target.id,
                    target_group_name: target.name.clone(),
                    user_id: member.id,
                    username: member.username,
                    points_distributed: points,
                    balance_before: balance_after - points,
                    balance_after,
                });
            }
        }

        let name = config.name.clone();
        let mut active: subscription_config::ActiveModel = config.into();
        active.last_processed_at = Set(Some(naive_now));
        active.update(&txn).await?;
        tracing::info!("Processed subscription '{}'", name);
    }

    txn.commit().await.inspect_err(|e| {
        tracing::error!("Failed to commit subscription tick: {}", e);
    })?;
    Ok(entries)
}

/// Runs one scheduler tick and writes the audit log.
///
/// Errors are logged, never returned; a failed tick changes nothing.
pub async fn run_tick(db: &DatabaseConnection, log_path: &std::path::Path, now: DateTime<Utc>) -> usize {
    let entries = match process_due_subscriptions(db, now).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Subscription tick failed and was rolled back: {}", e);
            return 0;
        }
    };

    let granted = entries.len();
    if granted == 0 {
        return 0;
    }

    let path = log_path.to_path_buf();
    let written = tokio::task::spawn_blocking(move || distribution_log::append_entries(&path, &entries)).await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Could not write distribution log {:?}: {}", log_path, e),
        Err(e) => tracing::error!("Distribution log writer for {:?} failed: {}", log_path, e),
    }
    granted
}

/// Starts the background scheduler task.
///
/// Ticks never overlap; a tick that runs long delays the next one instead of
/// queueing extra ticks.
#[must_use]
pub fn spawn_scheduler(
    db: DatabaseConnection,
    log_path: PathBuf,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("Subscription scheduler running every {:?}", period);

        loop {
            interval.tick().await;
            let granted = run_tick(&db, &log_path, Utc::now()).await;
            if granted > 0 {
                tracing::info!("Subscription tick granted points {} times", granted);
            }
        }
    })
}

/// Fields accepted when creating or updating a config.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionInput {
    /// Unique name
    pub name: String,
    /// `daily`, `weekly` or `monthly`
    pub distribution_frequency: String,
    /// Weekday (0 = Monday) or day of month, ignored for daily configs
    #[serde(default)]
    pub distribution_day: Option<i32>,
    /// Time of day as `HH:MM` (UTC)
    pub distribution_time: String,
    /// Points per grant
    pub points_to_distribute: i64,
    /// Whether the scheduler considers this config
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Target group ids
    #[serde(default)]
    pub group_ids: Vec<i64>,
}

const fn default_active() -> bool {
    true
}

/// Config with its target groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionView {
    /// Stored config
    #[serde(flatten)]
    pub config: subscription_config::Model,
    /// Target groups as `(id, name)`
    pub target_groups: Vec<GroupRef>,
}

/// Id and name of a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRef {
    /// Group id
    pub id: i64,
    /// Group name
    pub name: String,
}

struct ValidInput {
    name: String,
    frequency: Frequency,
    day: Option<i32>,
    time: NaiveTime,
}

fn validate_input(input: &SubscriptionInput) -> Result<ValidInput> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(Error::validation("Subscription name is required"));
    }

    let frequency: Frequency = input.distribution_frequency.parse()?;
    let day = match frequency {
        Frequency::Daily => None,
        Frequency::Weekly => match input.distribution_day {
            Some(day @ 0..=6) => Some(day),
            _ => {
                return Err(Error::validation(
                    "Weekly subscriptions need a weekday between 0 (Monday) and 6 (Sunday)",
                ));
            }
        },
        Frequency::Monthly => match input.distribution_day {
            Some(day @ 1..=31) => Some(day),
            _ => {
                return Err(Error::validation(
                    "Monthly subscriptions need a day of month between 1 and 31",
                ));
            }
        },
    };

    let time = NaiveTime::parse_from_str(input.distribution_time.trim(), "%H:%M").map_err(|_| {
        Error::validation(format!(
            "Invalid distribution time '{}', expected HH:MM",
            input.distribution_time
        ))
    })?;

    if input.points_to_distribute < 0 {
        return Err(Error::validation("Points to distribute cannot be negative"));
    }

    Ok(ValidInput {
        name: name.to_string(),
        frequency,
        day,
        time,
    })
}

async fn replace_targets<C>(db: &C, config_id: i64, group_ids: &[i64]) -> Result<()>
where
    C: ConnectionTrait,
{
    let mut unique = group_ids.to_vec();
    unique.sort_unstable();
    unique.dedup();

    for group_id in &unique {
        if Group::find_by_id(*group_id).one(db).await?.is_none() {
            return Err(Error::validation(format!("Group {group_id} does not exist")));
        }
    }

    SubscriptionConfigGroup::delete_many()
        .filter(subscription_config_group::Column::SubscriptionConfigId.eq(config_id))
        .exec(db)
        .await?;
    for group_id in unique {
        subscription_config_group::ActiveModel {
            subscription_config_id: Set(config_id),
            group_id: Set(group_id),
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

async fn ensure_unique_name<C>(db: &C, name: &str, except: Option<i64>) -> Result<()>
where
    C: ConnectionTrait,
{
    let existing = SubscriptionConfig::find()
        .filter(subscription_config::Column::Name.eq(name))
        .one(db)
        .await?;
    match existing {
        Some(other) if Some(other.id) != except => Err(Error::conflict(format!(
            "Subscription '{name}' already exists"
        ))),
        _ => Ok(()),
    }
}

async fn view_of<C>(db: &C, config: subscription_config::Model) -> Result<SubscriptionView>
where
    C: ConnectionTrait,
{
    let target_groups = config
        .find_related(Group)
        .order_by_asc(group::Column::Name)
        .all(db)
        .await?
        .into_iter()
        .map(|g| GroupRef { id: g.id, name: g.name })
        .collect();
    Ok(SubscriptionView {
        config,
        target_groups,
    })
}

/// Creates a config and its target groups.
pub async fn create_subscription(
    db: &DatabaseConnection,
    input: &SubscriptionInput,
) -> Result<SubscriptionView> {
    let valid = validate_input(input)?;
    let txn = db.begin().await?;
    ensure_unique_name(&txn, &valid.name, None).await?;

    let config = subscription_config::ActiveModel {
        name: Set(valid.name),
        distribution_frequency: Set(valid.frequency.as_str().to_string()),
        distribution_day: Set(valid.day),
        distribution_time: Set(valid.time),
        points_to_distribute: Set(input.points_to_distribute),
        is_active: Set(input.is_active),
        last_processed_at: Set(None),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    replace_targets(&txn, config.id, &input.group_ids).await?;

    let view = view_of(&txn, config).await?;
    txn.commit().await?;
    tracing::info!("Created subscription '{}'", view.config.name);
    Ok(view)
}

/// Replaces every field of a config, including its target groups.
pub async fn update_subscription(
    db: &DatabaseConnection,
    config_id: i64,
    input: &SubscriptionInput,
) -> Result<SubscriptionView> {
    let valid = validate_input(input)?;
    let txn = db.begin().await?;

    let existing = SubscriptionConfig::find_by_id(config_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("subscription", config_id))?;
    ensure_unique_name(&txn, &valid.name, Some(config_id)).await?;

    let mut active: subscription_config::ActiveModel = existing.into();
    active.name = Set(valid.name);
    active.distribution_frequency = Set(valid.frequency.as_str().to_string());
    active.distribution_day = Set(valid.day);
    active.distribution_time = Set(valid.time);
    active.points_to_distribute = Set(input.points_to_distribute);
    active.is_active = Set(input.is_active);
    let config = active.update(&txn).await?;
    replace_targets(&txn, config_id, &input.group_ids).await?;

    let view = view_of(&txn, config).await?;
    txn.commit().await?;
    tracing::info!("Updated subscription '{}'", view.config.name);
    Ok(view)
}

/// Deletes a config and its target links.
pub async fn delete_subscription(db: &DatabaseConnection, config_id: i64) -> Result<()> {
    let txn = db.begin().await?;
    let existing = SubscriptionConfig::find_by_id(config_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("subscription", config_id))?;

    SubscriptionConfigGroup::delete_many()
        .filter(subscription_config_group::Column::SubscriptionConfigId.eq(config_id))
        .exec(&txn)
        .await?;
    existing.delete(&txn).await?;
    txn.commit().await?;

    tracing::info!("Deleted subscription {}", config_id);
    Ok(())
}

/// All configs ordered by name.
pub async fn list_subscriptions<C>(db: &C) -> Result<Vec<SubscriptionView>>
where
    C: ConnectionTrait,
{
    let configs = SubscriptionConfig::find()
        .order_by_asc(subscription_config::Column::Name)
        .all(db)
        .await?;

    let mut views = Vec::with_capacity(configs.len());
    for config in configs {
        views.push(view_of(db, config).await?);
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::groups;
    use crate::test_utils::*;
    use chrono::{NaiveDate, TimeZone};

    fn config(frequency: &str, day: Option<i32>, time: &str) -> subscription_config::Model {
        subscription_config::Model {
            id: 1,
            name: "plan".to_string(),
            distribution_frequency: frequency.to_string(),
            distribution_day: day,
            distribution_time: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
            points_to_distribute: 10,
            is_active: true,
            last_processed_at: None,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 30)
            .unwrap()
    }

    fn input(name: &str, group_ids: Vec<i64>) -> SubscriptionInput {
        SubscriptionInput {
            name: name.to_string(),
            distribution_frequency: "daily".to_string(),
            distribution_day: None,
            distribution_time: "08:00".to_string(),
            points_to_distribute: 100,
            is_active: true,
            group_ids,
        }
    }

    #[test]
    fn test_is_due_checks_minute() {
        let daily = config("daily", None, "08:00");
        assert!(is_due(&daily, at(2024, 5, 1, 8, 0)));
        assert!(!is_due(&daily, at(2024, 5, 1, 8, 1)));
        assert!(!is_due(&daily, at(2024, 5, 1, 9, 0)));
    }

    #[test]
    fn test_is_due_weekly_and_monthly() {
        // 2024-05-06 is a Monday
        let weekly = config("weekly", Some(0), "12:30");
        assert!(is_due(&weekly, at(2024, 5, 6, 12, 30)));
        assert!(!is_due(&weekly, at(2024, 5, 7, 12, 30)));

        let monthly = config("monthly", Some(15), "00:00");
        assert!(is_due(&monthly, at(2024, 6, 15, 0, 0)));
        assert!(!is_due(&monthly, at(2024, 6, 14, 0, 0)));

        let no_day = config("weekly", None, "12:30");
        assert!(!is_due(&no_day, at(2024, 5, 6, 12, 30)));
    }

    #[test]
    fn test_is_due_skips_processed_slot() {
        let mut daily = config("daily", None, "08:00");
        daily.last_processed_at = Some(at(2024, 5, 1, 8, 0));
        assert!(!is_due(&daily, at(2024, 5, 1, 8, 0)));
        // next day the same slot fires again
        assert!(is_due(&daily, at(2024, 5, 2, 8, 0)));

        daily.is_active = false;
        assert!(!is_due(&daily, at(2024, 5, 2, 8, 0)));
    }

    #[tokio::test]
    async fn test_process_grants_per_group_membership() -> Result<()> {
        let db = setup_test_db().await?;
        let vip = groups::create_group(&db, "VIP").await?;
        let staff = groups::create_group(&db, "Staff").await?;
        let alice = create_test_user_with_points(&db, "alice", 5).await?;
        let bob = create_test_user(&db, "bob").await?;
        groups::add_member(&db, vip.id, "alice").await?;
        groups::add_member(&db, staff.id, "alice").await?;
        groups::add_member(&db, vip.id, "bob").await?;

        create_subscription(&db, &input("Daily bonus", vec![vip.id, staff.id])).await?;

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 10).unwrap();
        let entries = process_due_subscriptions(&db, now).await?;
        assert_eq!(entries.len(), 3);

        let alice = User::find_by_id(alice.id).one(&db).await?.unwrap();
        let bob = User::find_by_id(bob.id).one(&db).await?.unwrap();
        assert_eq!(alice.points, 205);
        assert_eq!(bob.points, 100);

        let alice_entries: Vec<_> = entries.iter().filter(|e| e.user_id == alice.id).collect();
        assert_eq!(alice_entries[0].balance_before, 5);
        assert_eq!(alice_entries[1].balance_before, 105);
        assert_eq!(alice_entries[1].balance_after, 205);

        // the same slot never fires twice
        let again = process_due_subscriptions(&db, now).await?;
        assert!(again.is_empty());
        let alice = User::find_by_id(alice.id).one(&db).await?.unwrap();
        assert_eq!(alice.points, 205);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_tick_writes_log() -> Result<()> {
        let db = setup_test_db().await?;
        let vip = groups::create_group(&db, "VIP").await?;
        create_test_user(&db, "carol").await?;
        groups::add_member(&db, vip.id, "carol").await?;
        create_subscription(&db, &input("Morning", vec![vip.id])).await?;

        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("points.json");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        assert_eq!(run_tick(&db, &log_path, now).await, 1);
        let logged = distribution_log::read_entries(&log_path)?;
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].username, "carol");
        assert_eq!(logged[0].subscription_config_name, "Morning");

        // not due a minute later
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 8, 1, 0).unwrap();
        assert_eq!(run_tick(&db, &log_path, later).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_tick_keeps_grants_when_log_is_unwritable() -> Result<()> {
        let db = setup_test_db().await?;
        let vip = groups::create_group(&db, "VIP").await?;
        let carol = create_test_user(&db, "carol").await?;
        groups::add_member(&db, vip.id, "carol").await?;
        create_subscription(&db, &input("Morning", vec![vip.id])).await?;

        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let log_path = blocker.join("points.json");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        assert_eq!(run_tick(&db, &log_path, now).await, 1);
        assert!(!log_path.exists());
        let carol = User::find_by_id(carol.id).one(&db).await?.unwrap();
        assert!(carol.points > 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_subscription_validation() -> Result<()> {
        let db = setup_test_db().await?;

        let mut bad = input("Weekly", vec![]);
        bad.distribution_frequency = "weekly".to_string();
        bad.distribution_day = Some(7);
        assert!(matches!(create_subscription(&db, &bad).await, Err(Error::Validation { .. })));

        let mut bad = input("Time", vec![]);
        bad.distribution_time = "25:99".to_string();
        assert!(matches!(create_subscription(&db, &bad).await, Err(Error::Validation { .. })));

        let mut bad = input("Negative", vec![]);
        bad.points_to_distribute = -1;
        assert!(matches!(create_subscription(&db, &bad).await, Err(Error::Validation { .. })));

        assert!(matches!(
            create_subscription(&db, &input("Ghost group", vec![999])).await,
            Err(Error::Validation { .. })
        ));
        assert!(list_subscriptions(&db).await?.is_empty());

        create_subscription(&db, &input("Unique", vec![])).await?;
        assert!(matches!(
            create_subscription(&db, &input("Unique", vec![])).await,
            Err(Error::Conflict { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_and_delete_subscription() -> Result<()> {
        let db = setup_test_db().await?;
        let vip = groups::create_group(&db, "VIP").await?;
        let created = create_subscription(&db, &input("Plan", vec![])).await?;
        assert!(created.target_groups.is_empty());

        let mut changed = input("Plan", vec![vip.id]);
        changed.distribution_frequency = "monthly".to_string();
        changed.distribution_day = Some(1);
        let updated = update_subscription(&db, created.config.id, &changed).await?;
        assert_eq!(updated.config.distribution_frequency, "monthly");
        assert_eq!(updated.config.distribution_day, Some(1));
        assert_eq!(updated.target_groups, vec![GroupRef {
            id: vip.id,
            name: "VIP".to_string()
        }]);

        delete_subscription(&db, created.config.id).await?;
        assert!(list_subscriptions(&db).await?.is_empty());
        assert!(matches!(
            delete_subscription(&db, created.config.id).await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }
}
