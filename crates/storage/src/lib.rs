//! Storage layer: file records and the batch gateway over them.
//!
//! Holds DB pool setup, the migration runner, and the two gateway adapters
//! (SQLite for real use, in-memory for tests and dry runs).

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use thiserror::Error;

pub mod gateway;
pub mod memory;
pub mod models;
pub mod sqlite;

pub use gateway::BatchGateway;
pub use memory::MemoryGateway;
pub use models::FileRecord;
pub use sqlite::SqliteGateway;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}", norm);
        }
        if !url.contains('?') {
            url.push_str("?mode=rwc");
        }
    }
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        opts = opts.max_connections(1);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect(&url).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Migrations live in crates/storage/migrations; re-running is a no-op.
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
