use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A row with the same unique key already exists.
    ///
    /// Ingestion treats this as "already known", not as a failure.
    #[error("Already exists: {0}")]
    Duplicate(String),

    /// The requested row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another process holds the database lock
    #[error("Database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }

    /// Map a failed INSERT, turning a UNIQUE violation into [`DatabaseError::Duplicate`].
    pub(crate) fn from_insert(err: sqlx::Error, key: &str) -> Self {
        let is_unique = err
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation());
        if is_unique {
            DatabaseError::Duplicate(key.to_owned())
        } else {
            DatabaseError::Other(err)
        }
    }

    /// True when the error is a uniqueness violation
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DatabaseError::Duplicate(_))
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed record.
///
/// All timestamps are Unix epoch milliseconds. `last_fetched_at = None` means
/// the feed has never completed a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub owner_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_fetched_at: Option<i64>,
    /// Most recent fetch failure, cleared by a completed check
    pub last_error: Option<String>,
    /// Fetch failures since the last completed check
    pub consecutive_failures: i64,
    /// When the most recent fetch failure happened
    pub last_failed_at: Option<i64>,
}

/// Post record. `url` is unique across all posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub publish_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A post about to be inserted
#[derive(Debug, Clone)]
pub struct NewPost {
    pub feed_id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub publish_date: Option<i64>,
}
