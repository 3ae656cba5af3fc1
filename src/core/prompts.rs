//! Prompt templates.
//!
//! Administrators author system templates (no owner), everyone else authors
//! personal ones. Names are unique per owner, the system counting as one
//! owner.

use crate::{
    entities::{PromptTemplate, User, prompt_template, user},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Condition, ModelTrait, QueryOrder, Set, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fields for a new template.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTemplate {
    /// Name, trimmed
    pub name: String,
    /// Template text
    pub template_string: String,
    /// Only honoured for administrators
    #[serde(default)]
    pub is_default: bool,
}

/// Partial update; absent fields stay unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateUpdate {
    /// New name
    #[serde(default)]
    pub name: Option<String>,
    /// New template text
    #[serde(default)]
    pub template_string: Option<String>,
    /// New default flag (system templates, administrators only)
    #[serde(default)]
    pub is_default: Option<bool>,
}

/// A user template together with its owner's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedTemplate {
    /// The template row
    #[serde(flatten)]
    pub template: prompt_template::Model,
    /// Owner username
    pub owner_username: String,
}

fn owner_condition(owner: Option<i64>) -> Condition {
    match owner {
        Some(id) => Condition::all().add(prompt_template::Column::UserId.eq(id)),
        None => Condition::all().add(prompt_template::Column::UserId.is_null()),
    }
}

async fn ensure_unique_name<C>(db: &C, owner: Option<i64>, name: &str, except: Option<i64>) -> Result<()>
where
    C: ConnectionTrait,
{
    let mut query = PromptTemplate::find()
        .filter(owner_condition(owner))
        .filter(prompt_template::Column::Name.eq(name));
    if let Some(id) = except {
        query = query.filter(prompt_template::Column::Id.ne(id));
    }

    if query.one(db).await?.is_some() {
        let scope = if owner.is_none() { "system " } else { "" };
        return Err(Error::conflict(format!("A {scope}template named '{name}' already exists")));
    }
    Ok(())
}

fn trimmed_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("Template name cannot be empty"));
    }
    Ok(name)
}

/// May `caller` change or remove this template?
#[must_use]
pub fn can_modify(caller: &user::Model, template: &prompt_template::Model) -> bool {
    match template.user_id {
        None => caller.is_admin,
        Some(owner) => owner == caller.id,
    }
}

/// Creates a template; system-owned when the caller is an administrator.
pub async fn create_template(
    db: &DatabaseConnection,
    caller: &user::Model,
    input: &NewTemplate,
) -> Result<prompt_template::Model> {
    let name = trimmed_name(&input.name)?;
    let owner = (!caller.is_admin).then_some(caller.id);
    ensure_unique_name(db, owner, name, None).await?;

    let now = Utc::now().naive_utc();
    let model = prompt_template::ActiveModel {
        name: Set(name.to_string()),
        template_string: Set(input.template_string.clone()),
        is_default: Set(caller.is_admin && input.is_default),
        user_id: Set(owner),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    tracing::info!(
        "User '{}' created template '{}' (id {})",
        caller.username,
        model.name,
        model.id
    );
    Ok(model)
}

/// System templates first, then the caller's own, each by name.
pub async fn list_visible<C>(db: &C, caller: &user::Model) -> Result<Vec<prompt_template::Model>>
where
    C: ConnectionTrait,
{
    let mut templates = PromptTemplate::find()
        .filter(
            Condition::any()
                .add(prompt_template::Column::UserId.is_null())
                .add(prompt_template::Column::UserId.eq(caller.id)),
        )
        .order_by_asc(prompt_template::Column::Name)
        .all(db)
        .await?;
    templates.sort_by_key(|t| t.user_id.is_some());
    Ok(templates)
}

/// A system template or one of the caller's own.
pub async fn get_visible<C>(db: &C, caller: &user::Model, template_id: i64) -> Result<prompt_template::Model>
where
    C: ConnectionTrait,
{
    let template = PromptTemplate::find_by_id(template_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("prompt template", template_id))?;

    match template.user_id {
        Some(owner) if owner != caller.id => {
            Err(Error::forbidden("You do not have access to this template"))
        }
        _ => Ok(template),
    }
}

/// Applies a partial update.
pub async fn update_template(
    db: &DatabaseConnection,
    caller: &user::Model,
    template_id: i64,
    update: &TemplateUpdate,
) -> Result<prompt_template::Model> {
    let template = PromptTemplate::find_by_id(template_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("prompt template", template_id))?;
    if !can_modify(caller, &template) {
        return Err(Error::forbidden("You may not modify this template"));
    }

    let owner = template.user_id;
    let mut active: prompt_template::ActiveModel = template.into();

    if let Some(name) = &update.name {
        let name = trimmed_name(name)?;
        ensure_unique_name(db, owner, name, Some(template_id)).await?;
        active.name = Set(name.to_string());
    }
    if let Some(text) = &update.template_string {
        active.template_string = Set(text.clone());
    }
    if let Some(is_default) = update.is_default.filter(|_| owner.is_none() && caller.is_admin) {
        active.is_default = Set(is_default);
    }
    active.updated_at = Set(Utc::now().naive_utc());

    let updated = active.update(db).await?;
    tracing::info!("Updated template '{}' (id {})", updated.name, updated.id);
    Ok(updated)
}

/// Deletes a template the caller may modify.
pub async fn delete_template(db: &DatabaseConnection, caller: &user::Model, template_id: i64) -> Result<()> {
    let template = PromptTemplate::find_by_id(template_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("prompt template", template_id))?;
    if !can_modify(caller, &template) {
        return Err(Error::forbidden("You may not delete this template"));
    }

    let name = template.name.clone();
    template.delete(db).await?;
    tracing::info!("User '{}' deleted template '{}'", caller.username, name);
    Ok(())
}

/// Every personal template, ordered by owner name then template name.
pub async fn admin_list_user_templates<C>(db: &C) -> Result<Vec<OwnedTemplate>>
where
    C: ConnectionTrait,
{
    let owners: HashMap<i64, String> = User::find()
        .all(db)
        .await?
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect();

    let mut templates: Vec<OwnedTemplate> = PromptTemplate::find()
        .filter(prompt_template::Column::UserId.is_not_null())
        .all(db)
        .await?
        .into_iter()
        .map(|template| {
            let owner_username = template
                .user_id
                .and_then(|id| owners.get(&id).cloned())
                .unwrap_or_default();
            OwnedTemplate {
                template,
                owner_username,
            }
        })
        .collect();

    templates.sort_by(|a, b| {
        a.owner_username
            .cmp(&b.owner_username)
            .then_with(|| a.template.name.cmp(&b.template.name))
    });
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn new_template(name: &str) -> NewTemplate {
        NewTemplate {
            name: name.to_string(),
            template_string: "Continue: @[前文]".to_string(),
            is_default: true,
        }
    }

    #[tokio::test]
    async fn test_owner_scoping_and_uniqueness() -> Result<()> {
        let db = setup_test_db().await?;
        let admin = create_test_admin(&db, "boss").await?;
        let alice = create_test_user(&db, "alice").await?;
        let bob = create_test_user(&db, "bob").await?;

        let system = create_template(&db, &admin, &new_template("Continue")).await?;
        assert_eq!(system.user_id, None);
        assert!(system.is_default);

        let personal = create_template(&db, &alice, &new_template("Continue")).await?;
        assert_eq!(personal.user_id, Some(alice.id));
        assert!(!personal.is_default);

        assert!(matches!(
            create_template(&db, &alice, &new_template(" Continue ")).await,
            Err(Error::Conflict { .. })
        ));
        assert!(matches!(
            create_template(&db, &admin, &new_template("Continue")).await,
            Err(Error::Conflict { .. })
        ));

        create_template(&db, &alice, &new_template("Analyse")).await?;
        let names: Vec<(Option<i64>, String)> = list_visible(&db, &alice)
            .await?
            .into_iter()
            .map(|t| (t.user_id, t.name))
            .collect();
        assert_eq!(
            names,
            vec![
                (None, "Continue".to_string()),
                (Some(alice.id), "Analyse".to_string()),
                (Some(alice.id), "Continue".to_string()),
            ]
        );

        assert_eq!(list_visible(&db, &bob).await?.len(), 1);
        assert!(matches!(
            get_visible(&db, &bob, personal.id).await,
            Err(Error::Forbidden { .. })
        ));
        assert_eq!(get_visible(&db, &bob, system.id).await?.id, system.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_and_delete_permissions() -> Result<()> {
        let db = setup_test_db().await?;
        let admin = create_test_admin(&db, "boss").await?;
        let alice = create_test_user(&db, "alice").await?;
        let system = create_template(&db, &admin, &new_template("System")).await?;
        let personal = create_template(&db, &alice, &new_template("Mine")).await?;
        create_template(&db, &alice, &new_template("Other")).await?;

        let rename = TemplateUpdate {
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            update_template(&db, &alice, system.id, &rename).await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            update_template(&db, &admin, personal.id, &rename).await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            update_template(
                &db,
                &alice,
                personal.id,
                &TemplateUpdate {
                    name: Some("Other".to_string()),
                    ..Default::default()
                }
            )
            .await,
            Err(Error::Conflict { .. })
        ));

        let renamed = update_template(&db, &alice, personal.id, &rename).await?;
        assert_eq!(renamed.name, "Renamed");

        let cleared = update_template(
            &db,
            &admin,
            system.id,
            &TemplateUpdate {
                is_default: Some(false),
                ..Default::default()
            },
        )
        .await?;
        assert!(!cleared.is_default);

        let listed = admin_list_user_templates(&db).await?;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|t| t.owner_username == "alice"));

        assert!(matches!(
            delete_template(&db, &alice, system.id).await,
            Err(Error::Forbidden { .. })
        ));
        delete_template(&db, &alice, personal.id).await?;
        delete_template(&db, &admin, system.id).await?;
        assert_eq!(list_visible(&db, &alice).await?.len(), 1);
        Ok(())
    }
}
