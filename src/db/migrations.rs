//! Ledger database setup: connection options and the idempotent schema.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the ledger database and apply `schema.sql`.
///
/// Every connection runs in WAL mode with foreign keys enforced, so the API
/// can read while a replay run is writing.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    let statements = run_migrations(&pool).await?;
    info!(db_path, statements, "ledger database ready");
    Ok(pool)
}

/// Apply every statement of `schema.sql`, returning how many ran.
async fn run_migrations(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
    let mut applied = 0usize;
    for statement in include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(statement).execute(pool).await?;
        applied += 1;
    }
    debug!(applied, "ledger schema statements applied");
    Ok(applied)
}
