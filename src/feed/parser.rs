use anyhow::Result;
use feed_rs::parser;

use super::source::{FeedDocument, FeedItem};

pub struct ParseResult {
    pub document: FeedDocument,
    /// Entries dropped because they carry no link to deduplicate on
    pub skipped: usize,
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult> {
    let feed = parser::parse(bytes)?;

    let title = feed
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled Feed".to_string());
    let description = feed
        .description
        .map(|d| d.content.trim().to_string())
        .unwrap_or_default();

    let total = feed.entries.len();
    let items: Vec<FeedItem> = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .filter(|href| !href.is_empty())?;
            let published = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.timestamp_millis());
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            Some(FeedItem {
                url,
                title,
                description,
                published,
            })
        })
        .collect();

    let skipped = total - items.len();
    Ok(ParseResult {
        document: FeedDocument {
            title,
            description,
            items,
        },
        skipped,
    })
}
