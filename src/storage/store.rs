use async_trait::async_trait;

use super::schema::Database;
use super::types::{DatabaseError, Feed, NewPost, Post};

/// Storage operations the scheduler, workers and registration flow depend on.
///
/// Implementations must be safe to call from many tasks at once and must
/// enforce URL uniqueness for both feeds and posts, reporting a violation as
/// [`DatabaseError::Duplicate`].
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn create_feed(
        &self,
        url: &str,
        title: &str,
        description: &str,
        owner_id: i64,
    ) -> Result<Feed, DatabaseError>;

    async fn get_feed_by_url(&self, url: &str) -> Result<Feed, DatabaseError>;

    async fn get_feed_by_id(&self, feed_id: i64) -> Result<Feed, DatabaseError>;

    /// Up to `limit` feeds, never-checked first, then oldest `last_fetched_at`
    async fn next_feeds_to_check(&self, limit: u32) -> Result<Vec<Feed>, DatabaseError>;

    async fn mark_feed_checked(&self, feed_id: i64, checked_at: i64)
        -> Result<Feed, DatabaseError>;

    /// Returns the new consecutive failure count
    async fn record_feed_failure(&self, feed_id: i64, error: &str) -> Result<i64, DatabaseError>;

    async fn create_post(&self, post: &NewPost) -> Result<Post, DatabaseError>;
}

#[async_trait]
impl FeedStore for Database {
    async fn create_feed(
        &self,
        url: &str,
        title: &str,
        description: &str,
        owner_id: i64,
    ) -> Result<Feed, DatabaseError> {
        Database::create_feed(self, url, title, description, owner_id).await
    }

    async fn get_feed_by_url(&self, url: &str) -> Result<Feed, DatabaseError> {
        Database::get_feed_by_url(self, url).await
    }

    async fn get_feed_by_id(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
        Database::get_feed_by_id(self, feed_id).await
    }

    async fn next_feeds_to_check(&self, limit: u32) -> Result<Vec<Feed>, DatabaseError> {
        Database::next_feeds_to_check(self, limit).await
    }

    async fn mark_feed_checked(
        &self,
        feed_id: i64,
        checked_at: i64,
    ) -> Result<Feed, DatabaseError> {
        Database::mark_feed_checked(self, feed_id, checked_at).await
    }

    async fn record_feed_failure(&self, feed_id: i64, error: &str) -> Result<i64, DatabaseError> {
        Database::record_feed_failure(self, feed_id, error).await
    }

    async fn create_post(&self, post: &NewPost) -> Result<Post, DatabaseError> {
        Database::create_post(self, post).await
    }
}
