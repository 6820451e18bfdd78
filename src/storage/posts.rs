use super::now_millis;
use super::schema::Database;
use super::types::{DatabaseError, NewPost, Post};

/// Maximum number of posts returned by a single listing query
const MAX_POSTS: i64 = 500;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Insert a post.
    ///
    /// The `UNIQUE(url)` constraint is the only deduplication mechanism: a
    /// second insert of the same URL, from this or any concurrent worker,
    /// fails with [`DatabaseError::Duplicate`] and leaves the first row as is.
    pub async fn create_post(&self, post: &NewPost) -> Result<Post, DatabaseError> {
        let now = now_millis();
        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (feed_id, url, title, description, publish_date, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, feed_id, url, title, description, publish_date, created_at, updated_at
        "#,
        )
        .bind(post.feed_id)
        .bind(&post.url)
        .bind(&post.title)
        .bind(&post.description)
        .bind(post.publish_date)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_insert(e, &post.url))
    }

    /// Look up a post by its URL
    pub async fn get_post_by_url(&self, url: &str) -> Result<Post, DatabaseError> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, feed_id, url, title, description, publish_date, created_at, updated_at
            FROM posts
            WHERE url = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("post {url}")))
    }

    /// Posts of one feed, newest publish date first
    pub async fn get_posts_for_feed(
        &self,
        feed_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Post>, DatabaseError> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, feed_id, url, title, description, publish_date, created_at, updated_at
            FROM posts
            WHERE feed_id = ?
            ORDER BY publish_date DESC, id DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(feed_id)
        .bind(limit.clamp(0, MAX_POSTS))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    /// Posts across every feed registered by `owner_id`, newest first
    pub async fn get_posts_for_owner(
        &self,
        owner_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Post>, DatabaseError> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT p.id, p.feed_id, p.url, p.title, p.description, p.publish_date,
                   p.created_at, p.updated_at
            FROM posts p
            JOIN feeds f ON f.id = p.feed_id
            WHERE f.owner_id = ?
            ORDER BY p.publish_date DESC, p.id DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(owner_id)
        .bind(limit.clamp(0, MAX_POSTS))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    /// Number of posts stored for a feed
    pub async fn count_posts_for_feed(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
