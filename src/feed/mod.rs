//! Feed retrieval: the [`ItemSource`] seam and its HTTP implementation.
//!
//! - [`source`] - the `ItemSource` trait, `FeedDocument`/`FeedItem`, `SourceError`
//! - [`fetcher`] - `HttpItemSource`: reqwest fetch with timeout, retries and a size cap
//! - [`parser`] - RSS/Atom/JSON Feed parsing using the `feed-rs` crate
//!
//! The scheduler only ever talks to `dyn ItemSource`, so tests substitute
//! in-memory sources without touching the network.

mod fetcher;
mod parser;
mod source;

pub use fetcher::{http_client, HttpItemSource};
pub use source::{FeedDocument, FeedItem, ItemSource, SourceError};
