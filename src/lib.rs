//! gleaner: polls syndication feeds and stores each new item exactly once.
//!
//! The [`scheduler`] picks the least recently checked feeds every cycle and
//! checks them concurrently through an [`feed::ItemSource`], writing posts to a
//! [`storage::FeedStore`]. New feeds come in through [`registration`].

pub mod config;
pub mod feed;
pub mod registration;
pub mod scheduler;
pub mod storage;
pub mod util;
