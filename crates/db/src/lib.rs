//! Persistent job store backed by one SQLite file per theme.
//!
//! [`open_store`] creates the file if needed, applies the embedded
//! migrations and verifies the connection. All job state transitions go
//! through [`repositories::JobRepo`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub mod error;
pub mod models;
pub mod repositories;

pub use error::JobStoreError;

pub type DbPool = sqlx::SqlitePool;

/// Two workers plus the coordinator need at most a handful of connections.
const MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits for SQLite's write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Path of the store file for a theme inside `data_dir`.
pub fn database_path(data_dir: &Path, theme_id: &str) -> PathBuf {
    data_dir.join(format!("{theme_id}.db"))
}

/// Create a connection pool for the SQLite file at `path`.
///
/// The file is created when missing. WAL journaling lets the stats
/// readers run alongside the two writers.
pub async fn create_pool(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
}

/// Run a trivial query to prove the pool can reach the database.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Open the store at `path`: connect, health-check and migrate.
///
/// Any failure here is fatal for a run; no worker has started yet.
pub async fn open_store(path: &Path) -> Result<DbPool, JobStoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| JobStoreError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let pool = create_pool(path).await?;
    health_check(&pool).await?;
    run_migrations(&pool).await?;

    tracing::info!(path = %path.display(), "Job store opened");
    Ok(pool)
}
