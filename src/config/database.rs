//! Database configuration module.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs without hand-written SQL. Creation is
//! idempotent (`IF NOT EXISTS`), which lets the server run it on every start.

use crate::entities::{
    AiService, ApiCallLog, AppSetting, Group, InvitationCode, Item, PromptTemplate,
    SubscriptionConfig, SubscriptionConfigGroup, User, UserGroup,
};
use crate::errors::Result;
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
    sea_query::TableCreateStatement,
};

const DEFAULT_DATABASE_URL: &str = "sqlite://novel_writer.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
///
/// This function looks for `DATABASE_URL` in the environment and falls back to
/// a local `SQLite` file (created on first use) if not found.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by [`get_database_url`].
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    tracing::debug!("Connecting to database at {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

fn create_statement<E: EntityTrait>(schema: &Schema, entity: E) -> TableCreateStatement {
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    statement
}

/// Creates all tables that do not exist yet.
///
/// Join tables are created after the tables they reference.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let statements = [
        create_statement(&schema, User),
        create_statement(&schema, Group),
        create_statement(&schema, UserGroup),
        create_statement(&schema, Item),
        create_statement(&schema, AiService),
        create_statement(&schema, PromptTemplate),
        create_statement(&schema, InvitationCode),
        create_statement(&schema, SubscriptionConfig),
        create_statement(&schema, SubscriptionConfigGroup),
        create_statement(&schema, ApiCallLog),
        create_statement(&schema, AppSetting),
    ];

    for statement in &statements {
        db.execute(builder.build(statement)).await?;
    }

    Ok(())
}
