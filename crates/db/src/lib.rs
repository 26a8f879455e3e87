//! Database initialization and migration logic for the order ingestion service.
//!
//! Provides `init_db_pool` for creating a connection pool, checking that the
//! database is reachable, and applying SQL migrations from the migrations directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use app_config::AppConfig;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio::fs;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::info;

/// Initializes the database connection pool and runs migrations.
///
/// A connection is taken eagerly so an unreachable database fails startup
/// instead of the first request.
///
/// # Errors
/// Returns an error if the pool cannot be created, the database is
/// unreachable, or a migration fails.
pub async fn init_db_pool(cfg: &AppConfig) -> Result<Pool> {
    let pg_config: PgConfig = cfg
        .postgres_dsn()
        .parse()
        .context("Failed to parse Postgres DSN")?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(cfg.db_pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .context("Failed to create database pool")?;

    let client = pool
        .get()
        .await
        .context("Failed to get DB connection for migrations")?;
    info!(host = %cfg.db_host, db = %cfg.db_name, "Connected to PostgreSQL");

    run_migrations(&client, &cfg.migrations_dir).await?;

    Ok(pool)
}

/// Applies all SQL migrations from the given directory, in file-name order.
///
/// # Errors
/// Returns an error if migration files cannot be read or applied.
pub async fn run_migrations(client: &Client, migrations_dir: impl AsRef<Path>) -> Result<()> {
    for path in migration_files(migrations_dir.as_ref()).await? {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("Applying migration: {}", file_name);

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read migration file {}", file_name))?;

        client
            .batch_execute(&content)
            .await
            .with_context(|| format!("Failed to execute migration {}", file_name))?;
    }
    Ok(())
}

/// Lists `.sql` files of the directory sorted by name.
pub async fn migration_files(migrations_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(migrations_dir)
        .await
        .with_context(|| format!("Failed to read migrations directory {}", migrations_dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
