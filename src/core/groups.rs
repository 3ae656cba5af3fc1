//! User groups and memberships.

use crate::{
    entities::{Group, SubscriptionConfigGroup, User, UserGroup, group, subscription_config_group, user, user_group},
    errors::{Error, Result},
};
use sea_orm::{ModelTrait, PaginatorTrait, QueryOrder, Set, TransactionTrait, prelude::*};
use serde::Serialize;

/// Group with its member count, as listed to administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    /// Group id
    pub id: i64,
    /// Group name
    pub name: String,
    /// Number of members
    pub member_count: u64,
}

/// Outcome of [`add_member`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    /// The user joined the group
    Added(user::Model),
    /// The user was already in the group
    AlreadyMember(user::Model),
}

/// Finds a group by id.
pub async fn get_group<C>(db: &C, group_id: i64) -> Result<group::Model>
where
    C: ConnectionTrait,
{
    Group::find_by_id(group_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("group", group_id))
}

/// Creates a group; names are trimmed and unique.
pub async fn create_group(db: &DatabaseConnection, name: &str) -> Result<group::Model> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("Group name is required"));
    }

    let existing = Group::find()
        .filter(group::Column::Name.eq(name))
        .one(db)
        .await?;
    if existing.is_some() {
        return Err(Error::conflict(format!("Group '{name}' already exists")));
    }

    let model = group::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    tracing::info!("Created group '{}' (id {})", model.name, model.id);
    Ok(model)
}

/// Deletes a group with its memberships and subscription targets.
pub async fn delete_group(db: &DatabaseConnection, group_id: i64) -> Result<()> {
    let txn = db.begin().await?;
    let model = get_group(&txn, group_id).await?;

    UserGroup::delete_many()
        .filter(user_group::Column::GroupId.eq(group_id))
        .exec(&txn)
        .await?;
    SubscriptionConfigGroup::delete_many()
        .filter(subscription_config_group::Column::GroupId.eq(group_id))
        .exec(&txn)
        .await?;
    let name = model.name.clone();
    model.delete(&txn).await?;

    txn.commit().await?;
    tracing::info!("Deleted group '{}' (id {})", name, group_id);
    Ok(())
}

/// All groups ordered by name, with member counts.
pub async fn list_groups<C>(db: &C) -> Result<Vec<GroupSummary>>
where
    C: ConnectionTrait,
{
    let groups = Group::find()
        .order_by_asc(group::Column::Name)
        .all(db)
        .await?;

    let mut summaries = Vec::with_capacity(groups.len());
    for model in groups {
        let member_count = UserGroup::find()
            .filter(user_group::Column::GroupId.eq(model.id))
            .count(db)
            .await?;
        summaries.push(GroupSummary {
            id: model.id,
            name: model.name,
            member_count,
        });
    }
    Ok(summaries)
}

/// Members of a group ordered by username.
pub async fn list_members<C>(db: &C, group_id: i64) -> Result<Vec<user::Model>>
where
    C: ConnectionTrait,
{
    let model = get_group(db, group_id).await?;
    model
        .find_related(User)
        .order_by_asc(user::Column::Username)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Adds a user, found by username, to a group.
pub async fn add_member(
    db: &DatabaseConnection,
    group_id: i64,
    username: &str,
) -> Result<MembershipChange> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::validation("Username is required"));
    }

    let txn = db.begin().await?;
    let model = get_group(&txn, group_id).await?;
    let member = User::find()
        .filter(user::Column::Username.eq(username))
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("user", username))?;

    let existing = UserGroup::find_by_id((member.id, group_id)).one(&txn).await?;
    if existing.is_some() {
        return Ok(MembershipChange::AlreadyMember(member));
    }

    user_group::ActiveModel {
        user_id: Set(member.id),
        group_id: Set(group_id),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    tracing::info!("Added user '{}' to group '{}'", member.username, model.name);
    Ok(MembershipChange::Added(member))
}

/// Removes a user from a group; fails if they were not a member.
pub async fn remove_member(db: &DatabaseConnection, group_id: i64, user_id: i64) -> Result<()> {
    get_group(db, group_id).await?;

    let removed = UserGroup::delete_many()
        .filter(user_group::Column::GroupId.eq(group_id))
        .filter(user_group::Column::UserId.eq(user_id))
        .exec(db)
        .await?
        .rows_affected;

    if removed == 0 {
        return Err(Error::not_found("group membership", user_id));
    }
    tracing::info!("Removed user {} from group {}", user_id, group_id);
    Ok(())
}

/// Names of the groups a user belongs to, ordered by name.
pub async fn group_names_for_user<C>(db: &C, user: &user::Model) -> Result<Vec<String>>
where
    C: ConnectionTrait,
{
    Ok(user
        .find_related(Group)
        .order_by_asc(group::Column::Name)
        .all(db)
        .await?
        .into_iter()
        .map(|g| g.name)
        .collect())
}

/// Drops every membership of a user.
pub async fn remove_user_memberships<C>(db: &C, user_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    Ok(UserGroup::delete_many()
        .filter(user_group::Column::UserId.eq(user_id))
        .exec(db)
        .await?
        .rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_create_group_trims_and_rejects_duplicates() -> Result<()> {
        let db = setup_test_db().await?;
        let model = create_group(&db, "  Writers ").await?;
        assert_eq!(model.name, "Writers");

        assert!(matches!(create_group(&db, "Writers").await, Err(Error::Conflict { .. })));
        assert!(matches!(create_group(&db, "   ").await, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_membership_lifecycle() -> Result<()> {
        let db = setup_test_db().await?;
        let group = create_group(&db, "VIP").await?;
        let alice = create_test_user(&db, "alice").await?;

        assert!(matches!(
            add_member(&db, group.id, "alice").await?,
            MembershipChange::Added(_)
        ));
        assert!(matches!(
            add_member(&db, group.id, "alice").await?,
            MembershipChange::AlreadyMember(_)
        ));
        assert!(matches!(
            add_member(&db, group.id, "nobody").await,
            Err(Error::NotFound { .. })
        ));

        let members = list_members(&db, group.id).await?;
        assert_eq!(members.len(), 1);
        assert_eq!(group_names_for_user(&db, &alice).await?, vec!["VIP".to_string()]);

        let summaries = list_groups(&db).await?;
        assert_eq!(summaries[0].member_count, 1);

        remove_member(&db, group.id, alice.id).await?;
        assert!(matches!(
            remove_member(&db, group.id, alice.id).await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_group_removes_memberships() -> Result<()> {
        let db = setup_test_db().await?;
        let group = create_group(&db, "Temp").await?;
        let bob = create_test_user(&db, "bob").await?;
        add_member(&db, group.id, "bob").await?;

        delete_group(&db, group.id).await?;
        assert!(group_names_for_user(&db, &bob).await?.is_empty());
        assert!(matches!(delete_group(&db, group.id).await, Err(Error::NotFound { .. })));
        Ok(())
    }
}
