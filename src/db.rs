use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{error, info};

use crate::config::AppConfig;

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("connect to database")
}

/// Applies the embedded migrations. Callers must treat an error as fatal.
pub async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    info!("Starting database migrations...");
    match sqlx::migrate!("./migrations").run(db).await {
        Ok(()) => {
            info!("Database migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Migration failed");
            Err(anyhow::Error::new(e).context("run database migrations"))
        }
    }
}
