mod feeds;
mod posts;
mod schema;
mod store;
mod types;

pub use schema::Database;
pub use store::FeedStore;
pub use types::{DatabaseError, Feed, NewPost, Post};

/// Current wall-clock time as Unix epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
