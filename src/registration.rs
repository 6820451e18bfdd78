//! Adding a feed: validate the URL, describe it with one fetch, store it, and
//! kick off its first check without waiting for the next cycle.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::feed::{ItemSource, SourceError};
use crate::scheduler::Scheduler;
use crate::storage::{DatabaseError, Feed, FeedStore};
use crate::util::{validate_url, UrlValidationError};

/// What a feed says about itself, read once at registration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedInfo {
    /// Normalized URL the feed will be stored under
    pub url: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),
    #[error("Feed could not be read: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Feed already registered: {0}")]
    AlreadyExists(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Database error: {0}")]
    Store(#[from] DatabaseError),
}

/// Check that `url` is acceptable and actually serves a feed, returning its
/// title and description. Nothing is written.
pub async fn validate_and_describe_feed(
    source: &dyn ItemSource,
    url: &str,
    timeout: Duration,
) -> Result<FeedInfo, ValidationError> {
    let url = validate_url(url)?;
    let document = source.fetch_and_parse(url.as_str(), timeout).await?;

    Ok(FeedInfo {
        url: url.into(),
        title: document.title,
        description: document.description,
    })
}

/// A freshly stored feed and the handle of its first check
pub struct Registration {
    pub feed: Feed,
    /// Resolves once the first check finishes. Dropping it does not cancel the check.
    pub first_check: JoinHandle<()>,
}

pub struct Registrar {
    store: Arc<dyn FeedStore>,
    source: Arc<dyn ItemSource>,
    scheduler: Scheduler,
    timeout: Duration,
}

impl Registrar {
    pub fn new(
        store: Arc<dyn FeedStore>,
        source: Arc<dyn ItemSource>,
        scheduler: Scheduler,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            source,
            scheduler,
            timeout,
        }
    }

    /// Register `url` for `owner_id`.
    ///
    /// The outcome of the first check never affects the result; only
    /// validation and storage failures are returned.
    pub async fn register(
        &self,
        url: &str,
        owner_id: i64,
    ) -> Result<Registration, RegistrationError> {
        let normalized = validate_url(url).map_err(ValidationError::from)?;

        match self.store.get_feed_by_url(normalized.as_str()).await {
            Ok(existing) => return Err(RegistrationError::AlreadyExists(existing.url)),
            Err(DatabaseError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let info =
            validate_and_describe_feed(self.source.as_ref(), normalized.as_str(), self.timeout)
                .await?;

        let feed = self
            .store
            .create_feed(&info.url, &info.title, &info.description, owner_id)
            .await
            .map_err(|e| match e {
                DatabaseError::Duplicate(_) => RegistrationError::AlreadyExists(info.url.clone()),
                other => RegistrationError::Store(other),
            })?;

        tracing::info!(
            feed_id = feed.id,
            url = %feed.url,
            owner_id = owner_id,
            "Feed registered"
        );

        let first_check = self.scheduler.trigger_immediate_check(feed.clone());
        Ok(Registration { feed, first_check })
    }
}
