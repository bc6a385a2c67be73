use serde::{Deserialize, Serialize};
use url::Url;

use super::model::{ChannelRecord, FeedEntry, FeedEntries, Instance};
use crate::error::{Error, Result};
use crate::feed::FeedDocument;

const DEFAULT_ENCODING: &str = "UTF-8";

/// Classification values stamped onto every new channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelDefaults {
    pub format: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subject: String,
    pub country: String,
    pub region: String,
    pub category: String,
    pub ranking: i64,
    pub update_period: String,
    pub update_frequency: i64,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            format: "rss".to_string(),
            kind: "webnews".to_string(),
            subject: "eucert".to_string(),
            country: "US".to_string(),
            region: "Global".to_string(),
            category: "Specialist".to_string(),
            ranking: 1,
            update_period: "daily".to_string(),
            update_frequency: 4,
        }
    }
}

/// Turns a parsed feed into a channel record.
#[derive(Debug, Clone, Default)]
pub struct ChannelBuilder {
    defaults: ChannelDefaults,
}

impl ChannelBuilder {
    pub fn new(defaults: ChannelDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &ChannelDefaults {
        &self.defaults
    }

    pub fn build(
        &self,
        doc: &FeedDocument,
        source_url: &Url,
        instance: Instance,
    ) -> Result<ChannelRecord> {
        let identifier = resolve_identifier(&doc.link, source_url)?;

        let title_source = if doc.title.is_empty() {
            source_url.as_str()
        } else {
            doc.title.as_str()
        };
        let id = format!("{}{}", instance.id_prefix(), sanitize_id(title_source));

        let encoding = doc
            .encoding
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_ENCODING)
            .to_string();

        let mut feeds = FeedEntries::new();
        feeds.insert(FeedEntry::new(doc.title.clone(), source_url.clone()));

        let defaults = &self.defaults;
        Ok(ChannelRecord {
            id,
            format: defaults.format.clone(),
            kind: defaults.kind.clone(),
            subject: defaults.subject.clone(),
            description: doc.description.clone(),
            identifier,
            encoding,
            country: defaults.country.clone(),
            region: defaults.region.clone(),
            category: defaults.category.clone(),
            ranking: defaults.ranking,
            language: doc.language.clone(),
            update_period: defaults.update_period.clone(),
            update_frequency: defaults.update_frequency,
            feeds,
        })
    }
}

/// Keeps ASCII letters and digits only.
pub fn sanitize_id(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// The channel's dedup key: the feed's own link made absolute against the
/// URL it was fetched from, or the site root when the feed has no link.
fn resolve_identifier(link: &str, source_url: &Url) -> Result<String> {
    let host = source_url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::InvalidUrl(format!("{} has no host", source_url)))?;

    if link.is_empty() {
        return Ok(match source_url.port() {
            Some(port) => format!("{}://{}:{}/", source_url.scheme(), host, port),
            None => format!("{}://{}/", source_url.scheme(), host),
        });
    }

    source_url
        .join(link)
        .map(String::from)
        .map_err(|e| {
            Error::InvalidUrl(format!(
                "Cannot resolve link {} against {}: {}",
                link, source_url, e
            ))
        })
}
