use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

/// Name of the logical store file inside the store directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// Open (or create) the index database under the given store directory,
/// with WAL journaling, foreign keys, and a lock wait instead of immediate
/// busy failures.
pub async fn connect(store_dir: &Path) -> Result<SqlitePool> {
    std::fs::create_dir_all(store_dir)?;
    let db_path = store_dir.join(INDEX_FILE);

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(sqlx::Error::from)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
