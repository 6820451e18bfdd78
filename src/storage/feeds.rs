use super::now_millis;
use super::schema::Database;
use super::types::{DatabaseError, Feed};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a newly registered feed.
    ///
    /// Returns [`DatabaseError::Duplicate`] when a feed with the same URL exists.
    pub async fn create_feed(
        &self,
        url: &str,
        title: &str,
        description: &str,
        owner_id: i64,
    ) -> Result<Feed, DatabaseError> {
        let now = now_millis();
        sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (url, title, description, owner_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, url, title, description, owner_id, created_at, updated_at,
                      last_fetched_at, last_error, consecutive_failures, last_failed_at
        "#,
        )
        .bind(url)
        .bind(title)
        .bind(description)
        .bind(owner_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_insert(e, url))
    }

    /// Look up a feed by its URL
    pub async fn get_feed_by_url(&self, url: &str) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, url, title, description, owner_id, created_at, updated_at,
                   last_fetched_at, last_error, consecutive_failures, last_failed_at
            FROM feeds
            WHERE url = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("feed {url}")))
    }

    /// Look up a feed by its ID
    pub async fn get_feed_by_id(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, url, title, description, owner_id, created_at, updated_at,
                   last_fetched_at, last_error, consecutive_failures, last_failed_at
            FROM feeds
            WHERE id = ?
        "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("feed id {feed_id}")))
    }

    /// All feeds in registration order
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, url, title, description, owner_id, created_at, updated_at,
                   last_fetched_at, last_error, consecutive_failures, last_failed_at
            FROM feeds
            ORDER BY created_at, id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Select up to `limit` feeds, least recently checked first.
    ///
    /// Feeds that were never checked sort before all others; ties fall back to
    /// the feed ID so the order is deterministic.
    ///
    /// A failed fetch leaves `last_fetched_at` alone, so a failing feed is
    /// retried on the next cycle. Once it reaches [`Self::FAILURE_THRESHOLD`]
    /// consecutive failures it is ranked by the time of its last failure
    /// instead, which puts it back into the rotation behind staler feeds.
    pub async fn next_feeds_to_check(&self, limit: u32) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, url, title, description, owner_id, created_at, updated_at,
                   last_fetched_at, last_error, consecutive_failures, last_failed_at
            FROM feeds
            ORDER BY
                CASE WHEN consecutive_failures >= ? THEN last_failed_at
                     ELSE last_fetched_at
                END ASC NULLS FIRST,
                id ASC
            LIMIT ?
        "#,
        )
        .bind(Self::FAILURE_THRESHOLD)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Stamp a feed as checked at `checked_at`, clearing its failure state.
    ///
    /// `last_fetched_at` never moves backwards: a stale stamp from a slower
    /// concurrent check leaves the newer value in place.
    pub async fn mark_feed_checked(
        &self,
        feed_id: i64,
        checked_at: i64,
    ) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, Feed>(
            r#"
            UPDATE feeds SET
                last_fetched_at = MAX(COALESCE(last_fetched_at, ?), ?),
                updated_at = MAX(updated_at, ?),
                last_error = NULL,
                consecutive_failures = 0
            WHERE id = ?
            RETURNING id, url, title, description, owner_id, created_at, updated_at,
                      last_fetched_at, last_error, consecutive_failures, last_failed_at
        "#,
        )
        .bind(checked_at)
        .bind(checked_at)
        .bind(checked_at)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("feed id {feed_id}")))
    }

    // ========================================================================
    // Failure Tracking
    // ========================================================================

    /// Consecutive failures after which a feed stops jumping the queue
    pub const FAILURE_THRESHOLD: i64 = 5;

    /// Record a failed fetch. Returns the new consecutive failure count.
    ///
    /// `last_fetched_at` is left untouched; `last_failed_at` is set to now.
    pub async fn record_feed_failure(
        &self,
        feed_id: i64,
        error: &str,
    ) -> Result<i64, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE feeds SET last_error = ?, last_failed_at = ?,
                 consecutive_failures = consecutive_failures + 1
             WHERE id = ? RETURNING consecutive_failures",
        )
        .bind(error)
        .bind(now_millis())
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(count,)| count)
            .ok_or_else(|| DatabaseError::NotFound(format!("feed id {feed_id}")))
    }

    /// Overwrite `last_fetched_at` directly. Test fixtures use this to age feeds.
    #[cfg(test)]
    pub(crate) async fn set_last_fetched_at(
        &self,
        feed_id: i64,
        at: Option<i64>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET last_fetched_at = ? WHERE id = ?")
            .bind(at)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
