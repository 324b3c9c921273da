mod app;
mod auth;
mod config;
mod context;
mod db;
mod logging;
mod response;
mod routes;
mod state;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guards = logging::init(&config)?;

    tracing::info!(port = config.port, "Task Manager Backend starting");
    tracing::info!("Environment: {}", config.mode.as_str());

    let app_state = match AppState::init(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Failed to initialize application");
            return Err(e);
        }
    };
    tracing::info!("Application initialization completed");

    app::serve(app::build_app(app_state), &config).await
}
