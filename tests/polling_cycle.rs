//! Integration tests for polling cycles against a mock HTTP server, plus a
//! property test for the "next feeds to check" ordering.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gleaner::feed::{http_client, HttpItemSource, ItemSource};
use gleaner::scheduler::{CycleReport, IngestionWorker, Scheduler, SchedulerConfig};
use gleaner::storage::{Database, FeedStore};

fn rss(name: &str, items: usize) -> String {
    let items: String = (0..items)
        .map(|i| {
            format!(
                "<item><title>{name} {i}</title><link>https://{name}.example.com/{i}</link></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{name}</title>{items}</channel></rss>"#
    )
}

async fn mount_feed(server: &MockServer, route: &str, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

fn scheduler(db: &Database, batch_size: u32) -> Scheduler {
    let store: Arc<dyn FeedStore> = Arc::new(db.clone());
    let source: Arc<dyn ItemSource> = Arc::new(
        HttpItemSource::new(http_client("gleaner-test").unwrap())
            .with_retry_base(Duration::from_millis(10)),
    );
    let worker = IngestionWorker::new(Arc::clone(&store), source)
        .with_fetch_timeout(Duration::from_secs(5))
        .with_worker_timeout(Duration::from_secs(10));
    Scheduler::new(
        store,
        worker,
        SchedulerConfig {
            batch_size,
            ..SchedulerConfig::default()
        },
    )
}

#[tokio::test]
async fn test_cycle_ingests_every_feed_once() {
    let server = MockServer::start().await;
    mount_feed(&server, "/alpha", 200, rss("alpha", 2)).await;
    mount_feed(&server, "/beta", 200, rss("beta", 3)).await;

    let db = Database::open(":memory:").await.unwrap();
    let alpha = db
        .create_feed(&format!("{}/alpha", server.uri()), "alpha", "", 1)
        .await
        .unwrap();
    let beta = db
        .create_feed(&format!("{}/beta", server.uri()), "beta", "", 1)
        .await
        .unwrap();
    let scheduler = scheduler(&db, 10);

    let first = scheduler.run_cycle().await;
    assert_eq!(
        first,
        CycleReport {
            selected: 2,
            succeeded: 2,
            failed: 0,
            new_posts: 5
        }
    );
    assert_eq!(db.count_posts_for_feed(alpha.id).await.unwrap(), 2);
    assert_eq!(db.count_posts_for_feed(beta.id).await.unwrap(), 3);

    let second = scheduler.run_cycle().await;
    assert_eq!(second.succeeded, 2);
    assert_eq!(second.new_posts, 0);
}

#[tokio::test]
async fn test_broken_feed_does_not_block_healthy_one() {
    let server = MockServer::start().await;
    mount_feed(&server, "/healthy", 200, rss("healthy", 1)).await;
    mount_feed(&server, "/gone", 404, String::new()).await;
    mount_feed(&server, "/garbage", 200, "<html>not a feed".to_string()).await;

    let db = Database::open(":memory:").await.unwrap();
    let healthy = db
        .create_feed(&format!("{}/healthy", server.uri()), "healthy", "", 1)
        .await
        .unwrap();
    let gone = db
        .create_feed(&format!("{}/gone", server.uri()), "gone", "", 1)
        .await
        .unwrap();
    let garbage = db
        .create_feed(&format!("{}/garbage", server.uri()), "garbage", "", 1)
        .await
        .unwrap();

    let report = scheduler(&db, 10).run_cycle().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);

    assert!(db.get_feed_by_id(healthy.id).await.unwrap().last_fetched_at.is_some());
    for broken in [gone.id, garbage.id] {
        let feed = db.get_feed_by_id(broken).await.unwrap();
        assert_eq!(feed.last_fetched_at, None, "failed feeds are retried next cycle");
        assert_eq!(feed.consecutive_failures, 1);
    }

    // Failed feeds stay at the front of the queue
    let next = db.next_feeds_to_check(2).await.unwrap();
    let mut ids: Vec<i64> = next.iter().map(|f| f.id).collect();
    ids.sort();
    assert_eq!(ids, vec![gone.id, garbage.id]);
}

#[tokio::test]
async fn test_cycles_rotate_through_feeds_in_batches() {
    let server = MockServer::start().await;
    let db = Database::open(":memory:").await.unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        mount_feed(&server, &format!("/{name}"), 200, rss(name, 1)).await;
        db.create_feed(&format!("{}/{name}", server.uri()), name, "", 1)
            .await
            .unwrap();
    }
    let scheduler = scheduler(&db, 2);

    assert_eq!(scheduler.run_cycle().await.selected, 2);
    assert_eq!(scheduler.run_cycle().await.selected, 2);
    assert_eq!(scheduler.run_cycle().await.selected, 2);

    // After three batches of two, every one of the five feeds has been checked
    let feeds = db.list_feeds().await.unwrap();
    assert!(feeds.iter().all(|f| f.last_fetched_at.is_some()));
    assert_eq!(db.get_posts_for_owner(1, 0, 100).await.unwrap().len(), 5);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Never-checked feeds always come before checked ones, and checked feeds
    /// follow ascending `last_fetched_at`.
    #[test]
    fn prop_never_checked_feeds_come_first(
        checked_at in proptest::collection::vec(proptest::option::of(1i64..1_000_000), 1..12),
        batch in 1u32..16,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let selected = runtime.block_on(async {
            let db = Database::open(":memory:").await.unwrap();
            for (i, at) in checked_at.iter().enumerate() {
                let feed = db
                    .create_feed(&format!("https://feed{i}.example.com/rss"), "feed", "", 1)
                    .await
                    .unwrap();
                if let Some(at) = at {
                    db.mark_feed_checked(feed.id, *at).await.unwrap();
                }
            }
            db.next_feeds_to_check(batch).await.unwrap()
        });

        let never_checked = checked_at.iter().filter(|at| at.is_none()).count();
        prop_assert_eq!(selected.len(), checked_at.len().min(batch as usize));

        let leading_nulls = selected
            .iter()
            .take_while(|f| f.last_fetched_at.is_none())
            .count();
        prop_assert_eq!(leading_nulls, never_checked.min(selected.len()));
        prop_assert!(selected[leading_nulls..]
            .iter()
            .all(|f| f.last_fetched_at.is_some()));
        prop_assert!(selected[leading_nulls..]
            .windows(2)
            .all(|w| w[0].last_fetched_at <= w[1].last_fetched_at));
    }
}
