use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle over the SQLite connection pool.
///
/// Cheap to clone; every clone shares the same pool, so one `Database` can be
/// handed to the scheduler, every worker and the registration flow at once.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// Pass `":memory:"` for a private in-memory database (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if the database file is locked
    /// (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            }
        }

        // busy_timeout=5000: concurrent workers writing posts wait up to 5 seconds
        // for the write lock instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // An in-memory database lives in a shared cache; serialize it through a
        // single connection so concurrent writers queue on the pool instead of
        // hitting SQLITE_LOCKED.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                owner_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_fetched_at INTEGER,
                last_error TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_failed_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                publish_date INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Serves next_feeds_to_check(): ORDER BY last_fetched_at NULLS FIRST
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_last_fetched ON feeds(last_fetched_at, id)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_owner ON feeds(owner_id)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_feed_published ON posts(feed_id, publish_date DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
