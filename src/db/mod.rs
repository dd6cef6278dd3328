mod decode;
mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// PostgreSQL pool configuration with optional read replica.
#[cfg(feature = "database-postgres")]
pub struct PgPoolPair {
    /// Primary pool for writes and migrations.
    pub write: sqlx::PgPool,
    /// Optional read replica pool. If None, reads use the write pool.
    pub read: Option<sqlx::PgPool>,
}

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    users: Arc<dyn UserRepo>,
    instances: Arc<dyn InstanceRepo>,
    abilities: Arc<dyn AbilityRepo>,
    instance_tokens: Arc<dyn InstanceTokenRepo>,
    access_tokens: Arc<dyn AccessTokenRepo>,
    usage_events: Arc<dyn UsageEventRepo>,
    event_logs: Arc<dyn EventLogRepo>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(PgPoolPair),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Database pool supporting both SQLite and PostgreSQL.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            users: Arc::new(sqlite::SqliteUserRepo::new(pool.clone())),
            instances: Arc::new(sqlite::SqliteInstanceRepo::new(pool.clone())),
            abilities: Arc::new(sqlite::SqliteAbilityRepo::new(pool.clone())),
            instance_tokens: Arc::new(sqlite::SqliteInstanceTokenRepo::new(pool.clone())),
            access_tokens: Arc::new(sqlite::SqliteAccessTokenRepo::new(pool.clone())),
            usage_events: Arc::new(sqlite::SqliteUsageEventRepo::new(pool.clone())),
            event_logs: Arc::new(sqlite::SqliteEventLogRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a DbPool from existing PostgreSQL pools.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(write_pool: sqlx::PgPool, read_pool: Option<sqlx::PgPool>) -> Self {
        let repos = CachedRepos {
            users: Arc::new(postgres::PostgresUserRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            instances: Arc::new(postgres::PostgresInstanceRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            abilities: Arc::new(postgres::PostgresAbilityRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            instance_tokens: Arc::new(postgres::PostgresInstanceTokenRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            access_tokens: Arc::new(postgres::PostgresAccessTokenRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            usage_events: Arc::new(postgres::PostgresUsageEventRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            event_logs: Arc::new(postgres::PostgresEventLogRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
        };
        DbPool {
            inner: PoolStorage::Postgres(PgPoolPair {
                write: write_pool,
                read: read_pool,
            }),
            repos,
        }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                use std::str::FromStr;

                use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

                // `sqlite:` URLs (including `sqlite::memory:`) pass through as-is,
                // anything else is a file path.
                let options = if cfg.path.starts_with("sqlite:") {
                    SqliteConnectOptions::from_str(&cfg.path)?
                } else {
                    SqliteConnectOptions::new().filename(&cfg.path)
                };

                let pool = SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        options
                            .create_if_missing(cfg.create_if_missing)
                            .foreign_keys(true)
                            .journal_mode(if cfg.wal_mode {
                                SqliteJournalMode::Wal
                            } else {
                                SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                Ok(Self::from_sqlite(pool))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let pool_options = || {
                    sqlx::postgres::PgPoolOptions::new()
                        .min_connections(cfg.min_connections)
                        .max_connections(cfg.max_connections)
                        .acquire_timeout(std::time::Duration::from_secs(cfg.connect_timeout_secs))
                        .idle_timeout(std::time::Duration::from_secs(cfg.idle_timeout_secs))
                };

                let write_pool = pool_options().connect(&cfg.url).await?;

                let read_pool = if let Some(read_url) = &cfg.read_url {
                    tracing::info!("Configuring read replica pool");
                    Some(pool_options().connect(read_url).await?)
                } else {
                    None
                };

                Ok(Self::from_postgres(write_pool, read_pool))
            }
        }
    }

    /// Run database migrations using sqlx's migration runner.
    /// Migrations always run on the primary (write) pool.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations_sqlx/postgres")
                    .run(&pools.write)
                    .await?;
                tracing::info!("PostgreSQL migrations completed successfully");
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    pub fn users(&self) -> Arc<dyn UserRepo> {
        Arc::clone(&self.repos.users)
    }

    pub fn instances(&self) -> Arc<dyn InstanceRepo> {
        Arc::clone(&self.repos.instances)
    }

    pub fn abilities(&self) -> Arc<dyn AbilityRepo> {
        Arc::clone(&self.repos.abilities)
    }

    pub fn instance_tokens(&self) -> Arc<dyn InstanceTokenRepo> {
        Arc::clone(&self.repos.instance_tokens)
    }

    pub fn access_tokens(&self) -> Arc<dyn AccessTokenRepo> {
        Arc::clone(&self.repos.access_tokens)
    }

    /// Append-only usage log and its aggregations
    pub fn usage_events(&self) -> Arc<dyn UsageEventRepo> {
        Arc::clone(&self.repos.usage_events)
    }

    pub fn event_logs(&self) -> Arc<dyn EventLogRepo> {
        Arc::clone(&self.repos.event_logs)
    }

    /// Backend name reported by `/health`.
    pub fn backend(&self) -> &'static str {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(_) => "sqlite",
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(_) => "postgres",
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                // Check both write and read pools
                sqlx::query("SELECT 1").execute(&pools.write).await?;
                if let Some(read) = &pools.read {
                    sqlx::query("SELECT 1").execute(read).await?;
                }
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}
