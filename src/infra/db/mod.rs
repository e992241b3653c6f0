//! Postgres-backed repository implementations.

mod curated;
mod movies;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};
use tracing::{info, warn};

use crate::application::repos::RepoError;
use crate::config::DatabaseSettings;
use crate::infra::error::InfraError;

const SOURCE: &str = "infra::db";

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(settings: &DatabaseSettings, url: &str) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(settings.max_connections.get())
            .acquire_timeout(settings.acquire_timeout)
            .connect(url)
            .await
    }

    /// Connect and migrate, or `None` when no database is configured or it
    /// cannot be reached. The catalog then serves from cache and snapshot.
    pub async fn connect_or_degrade(settings: &DatabaseSettings) -> Option<Self> {
        let Some(url) = settings.url.as_deref() else {
            info!(
                target = SOURCE,
                "No database configured, serving from snapshot only"
            );
            return None;
        };

        match Self::connect_and_migrate(settings, url).await {
            Ok(repos) => Some(repos),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    error = %err,
                    "Database unavailable, serving from snapshot only"
                );
                None
            }
        }
    }

    async fn connect_and_migrate(
        settings: &DatabaseSettings,
        url: &str,
    ) -> Result<Self, InfraError> {
        let pool = Self::connect(settings, url)
            .await
            .map_err(|err| InfraError::database(err.to_string()))?;
        Self::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(pool).await
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    fn convert_count(value: i64) -> Result<u64, RepoError> {
        value
            .try_into()
            .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
    }
}
