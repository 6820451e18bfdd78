use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;

use super::parser::{parse_feed, ParseResult};
use super::source::{FeedDocument, ItemSource, SourceError};

const MAX_RETRIES: u32 = 3;
const MAX_REDIRECTS: usize = 3;
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Build the client used for feed requests.
///
/// Redirects are limited to three hops and a URL seen twice in the chain is
/// treated as a loop.
pub fn http_client(user_agent: &str) -> Result<reqwest::Client, reqwest::Error> {
    let policy = Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }
        let next = attempt.url().as_str();
        if attempt.previous().iter().any(|prev| prev.as_str() == next) {
            return attempt.error("Redirect loop detected");
        }
        tracing::debug!(
            to = %attempt.url(),
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    });

    reqwest::Client::builder()
        .user_agent(user_agent)
        .redirect(policy)
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// [`ItemSource`] backed by HTTP.
///
/// # Behavior
///
/// - Each request is bounded by the caller's timeout
/// - Rate limiting (HTTP 429), 5xx responses and truncated bodies are retried
///   up to 3 times with exponential backoff (base, 2x base, 4x base)
/// - 4xx responses fail immediately
/// - Response bodies are capped at `max_feed_size` bytes
#[derive(Clone)]
pub struct HttpItemSource {
    client: reqwest::Client,
    max_feed_size: usize,
    retry_base: Duration,
}

impl HttpItemSource {
    /// Wrap an existing client (caller controls user agent, proxies, TLS)
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_feed_size: DEFAULT_MAX_FEED_SIZE,
            retry_base: DEFAULT_RETRY_BASE,
        }
    }

    pub fn with_max_feed_size(mut self, bytes: usize) -> Self {
        self.max_feed_size = bytes;
        self
    }

    /// Base delay for retry backoff. Tests shrink this to keep retries fast.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.retry_base.saturating_mul(2u32.saturating_pow(retry_count))
    }

    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, SourceError> {
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(timeout, self.client.get(url).send())
                .await
                .map_err(|_| SourceError::Timeout)?
                .map_err(SourceError::Network)?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= MAX_RETRIES {
                    return Err(SourceError::RateLimited(MAX_RETRIES));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    url = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(SourceError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(SourceError::HttpStatus(status.as_u16()));
            }

            match tokio::time::timeout(timeout, read_limited_bytes(response, self.max_feed_size))
                .await
                .map_err(|_| SourceError::Timeout)?
            {
                Ok(bytes) => return Ok(bytes),
                Err(SourceError::IncompleteResponse { expected, received }) => {
                    if retry_count >= MAX_RETRIES {
                        return Err(SourceError::IncompleteResponse { expected, received });
                    }
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        url = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ItemSource for HttpItemSource {
    async fn fetch_and_parse(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<FeedDocument, SourceError> {
        let bytes = self.fetch_bytes(url, timeout).await?;

        let ParseResult { document, skipped } =
            parse_feed(&bytes).map_err(|e| SourceError::Parse(e.to_string()))?;

        if skipped > 0 {
            tracing::warn!(
                url = %url,
                filtered = skipped,
                "Items without a link skipped"
            );
        }

        Ok(document)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SourceError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(SourceError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(SourceError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(SourceError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(SourceError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
