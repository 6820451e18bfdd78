use std::sync::Arc;
use std::time::Duration;

use crate::feed::{FeedItem, ItemSource, SourceError};
use crate::storage::{now_millis, DatabaseError, Feed, FeedStore, NewPost};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-item counts from one ingestion
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    /// Items stored as new posts
    pub inserted: usize,
    /// Items whose URL was already stored
    pub duplicates: usize,
    /// Items that hit a persistence error other than a duplicate
    pub failed: usize,
}

/// How a single ingestion ended. Only used for logging and cycle statistics.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Items processed and the feed stamped as checked
    Completed(IngestStats),
    /// The source could not be fetched or parsed; nothing was written
    FetchFailed(SourceError),
    /// Items were processed but the feed could not be stamped
    MarkFailed {
        stats: IngestStats,
        error: DatabaseError,
    },
    /// The whole sequence exceeded its time budget and was abandoned
    TimedOut,
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IngestOutcome::Completed(_))
    }

    /// Posts created by this ingestion, whatever the final outcome
    pub fn inserted(&self) -> usize {
        match self {
            IngestOutcome::Completed(stats) | IngestOutcome::MarkFailed { stats, .. } => {
                stats.inserted
            }
            IngestOutcome::FetchFailed(_) | IngestOutcome::TimedOut => 0,
        }
    }
}

/// Checks exactly one feed: fetch, persist new items, stamp as checked.
///
/// Every failure is absorbed here and logged with feed context; `run` always
/// returns. Deduplication is left entirely to the store's URL uniqueness, so
/// any number of workers may process the same feed concurrently.
pub struct IngestionWorker {
    store: Arc<dyn FeedStore>,
    source: Arc<dyn ItemSource>,
    fetch_timeout: Duration,
    worker_timeout: Duration,
}

impl IngestionWorker {
    pub fn new(store: Arc<dyn FeedStore>, source: Arc<dyn ItemSource>) -> Self {
        Self {
            store,
            source,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }

    /// Timeout handed to the [`ItemSource`] for each request
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Budget for the whole fetch/persist/mark sequence
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Check `feed` within the default worker timeout.
    pub async fn run(&self, feed: &Feed) -> IngestOutcome {
        self.run_with_timeout(feed, self.worker_timeout).await
    }

    /// Check `feed`, abandoning the attempt once `budget` elapses.
    pub async fn run_with_timeout(&self, feed: &Feed, budget: Duration) -> IngestOutcome {
        match tokio::time::timeout(budget, self.ingest(feed)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    feed_id = feed.id,
                    url = %feed.url,
                    budget_ms = budget.as_millis() as u64,
                    "Feed check timed out, abandoning"
                );
                self.record_failure(feed, "check timed out").await;
                IngestOutcome::TimedOut
            }
        }
    }

    async fn ingest(&self, feed: &Feed) -> IngestOutcome {
        let document = match self
            .source
            .fetch_and_parse(&feed.url, self.fetch_timeout)
            .await
        {
            Ok(document) => document,
            Err(e) => {
                // last_fetched_at stays as is: the feed is retried next cycle
                tracing::warn!(
                    feed_id = feed.id,
                    url = %feed.url,
                    parse_error = e.is_parse(),
                    error = %e,
                    "Failed to fetch feed"
                );
                self.record_failure(feed, &e.to_string()).await;
                return IngestOutcome::FetchFailed(e);
            }
        };

        let mut stats = IngestStats::default();
        for item in document.items {
            self.persist_item(feed, item, &mut stats).await;
        }

        match self.store.mark_feed_checked(feed.id, now_millis()).await {
            Ok(_) => {
                tracing::debug!(
                    feed_id = feed.id,
                    url = %feed.url,
                    inserted = stats.inserted,
                    duplicates = stats.duplicates,
                    failed = stats.failed,
                    "Feed checked"
                );
                IngestOutcome::Completed(stats)
            }
            Err(e) => {
                tracing::error!(
                    feed_id = feed.id,
                    url = %feed.url,
                    error = %e,
                    "Failed to mark feed as checked"
                );
                IngestOutcome::MarkFailed { stats, error: e }
            }
        }
    }

    async fn persist_item(&self, feed: &Feed, item: FeedItem, stats: &mut IngestStats) {
        let post = NewPost {
            feed_id: feed.id,
            url: item.url,
            title: item.title,
            description: item.description,
            publish_date: item.published,
        };

        match self.store.create_post(&post).await {
            Ok(_) => stats.inserted += 1,
            Err(e) if e.is_duplicate() => stats.duplicates += 1,
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(
                    feed_id = feed.id,
                    item_url = %post.url,
                    error = %e,
                    "Failed to store item"
                );
            }
        }
    }

    async fn record_failure(&self, feed: &Feed, error: &str) {
        match self.store.record_feed_failure(feed.id, error).await {
            Ok(failures) => {
                tracing::debug!(feed_id = feed.id, failures = failures, "Recorded feed failure");
            }
            Err(db_err) => {
                tracing::warn!(
                    feed_id = feed.id,
                    error = %db_err,
                    "Failed to record feed failure"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedDocument;
    use crate::storage::{Database, Post};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct StaticSource(FeedDocument);

    #[async_trait]
    impl ItemSource for StaticSource {
        async fn fetch_and_parse(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<FeedDocument, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ItemSource for FailingSource {
        async fn fetch_and_parse(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<FeedDocument, SourceError> {
            Err(SourceError::HttpStatus(503))
        }
    }

    struct HangingSource;

    #[async_trait]
    impl ItemSource for HangingSource {
        async fn fetch_and_parse(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<FeedDocument, SourceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(SourceError::Timeout)
        }
    }

    /// Delegates to a real database but fails inserts of one URL
    struct FlakyStore {
        db: Database,
        poisoned_url: String,
    }

    #[async_trait]
    impl FeedStore for FlakyStore {
        async fn create_feed(
            &self,
            url: &str,
            title: &str,
            description: &str,
            owner_id: i64,
        ) -> Result<Feed, DatabaseError> {
            self.db.create_feed(url, title, description, owner_id).await
        }

        async fn get_feed_by_url(&self, url: &str) -> Result<Feed, DatabaseError> {
            self.db.get_feed_by_url(url).await
        }

        async fn get_feed_by_id(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
            self.db.get_feed_by_id(feed_id).await
        }

        async fn next_feeds_to_check(&self, limit: u32) -> Result<Vec<Feed>, DatabaseError> {
            self.db.next_feeds_to_check(limit).await
        }

        async fn mark_feed_checked(
            &self,
            feed_id: i64,
            checked_at: i64,
        ) -> Result<Feed, DatabaseError> {
            self.db.mark_feed_checked(feed_id, checked_at).await
        }

        async fn record_feed_failure(
            &self,
            feed_id: i64,
            error: &str,
        ) -> Result<i64, DatabaseError> {
            self.db.record_feed_failure(feed_id, error).await
        }

        async fn create_post(&self, post: &NewPost) -> Result<Post, DatabaseError> {
            if post.url == self.poisoned_url {
                return Err(DatabaseError::Other(sqlx::Error::PoolTimedOut));
            }
            self.db.create_post(post).await
        }
    }

    fn item(slug: &str) -> FeedItem {
        FeedItem {
            url: format!("https://example.com/{}", slug),
            title: format!("Item {}", slug),
            description: String::new(),
            published: Some(1_700_000_000_000),
        }
    }

    fn document(items: Vec<FeedItem>) -> FeedDocument {
        FeedDocument {
            title: "Example".to_string(),
            description: String::new(),
            items,
        }
    }

    async fn setup() -> (Database, Feed) {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .create_feed("https://example.com/feed.xml", "Example", "", 1)
            .await
            .unwrap();
        (db, feed)
    }

    fn worker(db: &Database, source: impl ItemSource + 'static) -> IngestionWorker {
        IngestionWorker::new(Arc::new(db.clone()), Arc::new(source))
    }

    #[tokio::test]
    async fn test_new_items_are_stored_and_feed_stamped() {
        let (db, feed) = setup().await;
        let worker = worker(&db, StaticSource(document(vec![item("a"), item("b")])));

        let outcome = worker.run(&feed).await;
        match outcome {
            IngestOutcome::Completed(stats) => assert_eq!(
                stats,
                IngestStats {
                    inserted: 2,
                    duplicates: 0,
                    failed: 0
                }
            ),
            other => panic!("expected Completed, got {:?}", other),
        }

        assert_eq!(db.count_posts_for_feed(feed.id).await.unwrap(), 2);
        let checked = db.get_feed_by_id(feed.id).await.unwrap();
        assert!(checked.last_fetched_at.is_some());
    }

    #[tokio::test]
    async fn test_second_run_only_counts_duplicates() {
        let (db, feed) = setup().await;
        let worker = worker(&db, StaticSource(document(vec![item("a"), item("b")])));

        worker.run(&feed).await;
        let outcome = worker.run(&feed).await;
        match outcome {
            IngestOutcome::Completed(stats) => {
                assert_eq!(stats.inserted, 0);
                assert_eq!(stats.duplicates, 2);
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(db.count_posts_for_feed(feed.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_feed_is_still_stamped() {
        let (db, feed) = setup().await;
        let worker = worker(&db, StaticSource(document(Vec::new())));

        assert!(worker.run(&feed).await.is_success());

        let checked = db.get_feed_by_id(feed.id).await.unwrap();
        assert!(
            checked.last_fetched_at.is_some(),
            "last_fetched_at should be set even with no items"
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_feed_and_posts_untouched() {
        let (db, feed) = setup().await;
        worker(&db, StaticSource(document(vec![item("a")])))
            .run(&feed)
            .await;
        let before = db.get_feed_by_id(feed.id).await.unwrap();

        let outcome = worker(&db, FailingSource).run(&before).await;
        assert!(matches!(
            outcome,
            IngestOutcome::FetchFailed(SourceError::HttpStatus(503))
        ));

        let after = db.get_feed_by_id(feed.id).await.unwrap();
        assert_eq!(after.last_fetched_at, before.last_fetched_at);
        assert_eq!(after.consecutive_failures, 1);
        assert!(after.last_error.is_some());
        assert_eq!(db.count_posts_for_feed(feed.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_item_failure_does_not_stop_other_items() {
        let (db, feed) = setup().await;
        let store = FlakyStore {
            db: db.clone(),
            poisoned_url: "https://example.com/b".to_string(),
        };
        let worker = IngestionWorker::new(
            Arc::new(store),
            Arc::new(StaticSource(document(vec![item("a"), item("b"), item("c")]))),
        );

        match worker.run(&feed).await {
            IngestOutcome::Completed(stats) => {
                assert_eq!(stats.inserted, 2);
                assert_eq!(stats.failed, 1);
            }
            other => panic!("expected Completed, got {:?}", other),
        }

        assert!(db.get_post_by_url("https://example.com/a").await.is_ok());
        assert!(db.get_post_by_url("https://example.com/c").await.is_ok());
        let checked = db.get_feed_by_id(feed.id).await.unwrap();
        assert!(
            checked.last_fetched_at.is_some(),
            "partial item failure still completes the check"
        );
    }

    #[tokio::test]
    async fn test_concurrent_runs_store_each_url_once() {
        let (db, feed) = setup().await;
        let items: Vec<FeedItem> = (0..20).map(|i| item(&i.to_string())).collect();
        let worker = Arc::new(worker(&db, StaticSource(document(items))));

        let first = {
            let worker = Arc::clone(&worker);
            let feed = feed.clone();
            tokio::spawn(async move { worker.run(&feed).await })
        };
        let second = {
            let worker = Arc::clone(&worker);
            let feed = feed.clone();
            tokio::spawn(async move { worker.run(&feed).await })
        };

        let a = first.await.unwrap();
        let b = second.await.unwrap();
        assert_eq!(a.inserted() + b.inserted(), 20);
        assert_eq!(db.count_posts_for_feed(feed.id).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_hung_fetch_is_abandoned() {
        let (db, feed) = setup().await;
        let worker = worker(&db, HangingSource).with_worker_timeout(Duration::from_millis(50));

        let outcome = worker.run(&feed).await;
        assert!(matches!(outcome, IngestOutcome::TimedOut));

        let after = db.get_feed_by_id(feed.id).await.unwrap();
        assert_eq!(after.last_fetched_at, None);
        assert_eq!(after.consecutive_failures, 1);
    }
}
