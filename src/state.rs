use std::{sync::Arc, time::Instant};

use crate::auth::repo::{PgUserStore, UserStore};
use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl AppState {
    /// Connects to Postgres and applies pending migrations before any
    /// traffic is accepted.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        db::migrate(&pool).await?;

        Ok(Self::from_parts(
            Arc::new(PgUserStore::new(pool)),
            Arc::new(config),
        ))
    }

    pub fn from_parts(users: Arc<dyn UserStore>, config: Arc<AppConfig>) -> Self {
        Self {
            users,
            config,
            started_at: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn fake(mode: crate::config::RuntimeMode) -> (Self, Arc<crate::auth::repo::memory::MemoryUserStore>) {
        let store = Arc::new(crate::auth::repo::memory::MemoryUserStore::default());
        let state = Self::from_parts(store.clone(), Arc::new(AppConfig::for_tests(mode)));
        (state, store)
    }
}
