use crate::config::AppPaths;
use crate::error::Result;
use crate::schema;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initializes the database connection pool and runs migrations.
pub fn init_database(paths: &AppPaths) -> Result<DbPool> {
    log::info!("Database path: {}", paths.db_path.display());
    open_pool(&paths.db_path)
}

pub fn open_pool(db_path: &Path) -> Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    let pool = r2d2::Pool::new(manager)?;

    let conn = pool.get()?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("SQLite journal mode: {mode}");
    run_migrations(&conn)?;

    Ok(pool)
}

/// Applies all pending database migrations.
fn run_migrations(connection: &Connection) -> Result<()> {
    let current: usize = connection.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))?
        as usize;
    if current >= schema::MIGRATIONS.len() {
        log::debug!("Schema up to date at version {current}");
        return Ok(());
    }

    log::info!("Running database migrations from version {current}...");
    for (idx, migration) in schema::MIGRATIONS.iter().enumerate().skip(current) {
        connection.execute_batch(migration)?;
        connection.pragma_update(None, "user_version", (idx + 1) as i64)?;
    }
    log::info!("Migrations applied successfully.");
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_pool() -> DbPool {
    let path = std::env::temp_dir().join(format!("plant_doctor_{}.db", uuid::Uuid::new_v4()));
    open_pool(&path).unwrap()
}
