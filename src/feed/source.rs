use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching and parsing a feed.
///
/// Everything except [`SourceError::Parse`] is a transport-level failure
/// reaching the source; `Parse` means the source answered with content that
/// is not a valid RSS/Atom/JSON feed.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the fetch timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed content could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl SourceError {
    /// True for malformed content, false for failures reaching the source
    pub fn is_parse(&self) -> bool {
        matches!(self, SourceError::Parse(_))
    }
}

/// One candidate item from a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub url: String,
    pub title: String,
    pub description: String,
    /// Unix epoch milliseconds
    pub published: Option<i64>,
}

/// A fetched and parsed feed, items in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: String,
    pub description: String,
    pub items: Vec<FeedItem>,
}

/// Fetches a feed URL and parses it into a [`FeedDocument`].
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn fetch_and_parse(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<FeedDocument, SourceError>;
}
