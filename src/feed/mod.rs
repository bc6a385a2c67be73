pub mod charset;
pub mod fetcher;
pub mod parser;

use chrono::{DateTime, Utc};

pub use fetcher::{FeedFetcher, FetchedFeed};
pub use parser::FeedParser;

/// A parsed syndication feed, reduced to what the channel builder needs.
#[derive(Debug, Clone, Default)]
pub struct FeedDocument {
    pub title: String,
    /// First non-empty entry of `link_candidates`, or empty.
    pub link: String,
    pub link_candidates: Vec<String>,
    pub description: String,
    pub language: String,
    pub published: Option<DateTime<Utc>>,
    pub last_build_date: Option<DateTime<Utc>>,
    /// Character set the document declared, if any.
    pub encoding: Option<String>,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub guid: Option<String>,
    pub description: Option<String>,
}

impl FeedDocument {
    /// Picks the primary link from the candidate list.
    pub fn select_link(&mut self) {
        self.link = self
            .link_candidates
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();
    }
}

/// Parses the date formats feeds use in practice: RFC 2822 for RSS,
/// RFC 3339 for Atom and Dublin Core.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
