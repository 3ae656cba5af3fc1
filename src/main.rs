#![allow(clippy::result_large_err)]

use dotenvy::dotenv;
use novel_writer::{
    api::{self, ApiState},
    config::{self, database},
    core::{subscription, users},
    errors::Result,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the main application configuration
    let app_config = config::load_default_config()
        .inspect_err(|e| error!("Critical error loading application configuration: {}", e))?;

    // 4. Initialize database and schema
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|()| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Seed the administrator on first start
    users::ensure_default_admin(&db, &app_config.admin).await?;

    // 6. Background point distribution
    let scheduler = app_config.scheduler.enabled.then(|| {
        subscription::spawn_scheduler(
            db.clone(),
            app_config.scheduler.distribution_log_path.clone(),
            app_config.scheduler.tick_interval(),
        )
    });
    if scheduler.is_none() {
        info!("Subscription scheduler disabled by configuration");
    }

    // 7. Serve until Ctrl-C
    let state = ApiState::new(db, app_config);
    api::serve(state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await?;

    if let Some(handle) = scheduler {
        handle.abort();
    }
    Ok(())
}
