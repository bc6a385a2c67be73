use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Which directory flavour is being maintained. Only affects human IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instance {
    #[default]
    Public,
    Private,
}

impl Instance {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Instance::Public => "",
            Instance::Private => "P_",
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instance::Public => write!(f, "public"),
            Instance::Private => write!(f, "private"),
        }
    }
}

impl FromStr for Instance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Instance::Public),
            "private" => Ok(Instance::Private),
            other => Err(Error::Config(format!("Unknown instance: {}", other))),
        }
    }
}

/// One feed URL that contributed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub url: Url,
}

impl FeedEntry {
    pub fn new(title: impl Into<String>, url: Url) -> Self {
        Self {
            title: title.into(),
            url,
        }
    }

    /// Entries point at the same feed when host and path match. Scheme,
    /// query, fragment and title are ignored.
    pub fn same_location(&self, other: &FeedEntry) -> bool {
        self.url.host_str() == other.url.host_str() && self.url.path() == other.url.path()
    }
}

/// Insertion-ordered set of feed entries keyed by location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntries(Vec<FeedEntry>);

impl FeedEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry` unless an entry with the same location exists.
    /// Returns whether it was added.
    pub fn insert(&mut self, entry: FeedEntry) -> bool {
        if self.contains_location(&entry) {
            return false;
        }
        self.0.push(entry);
        true
    }

    pub fn contains_location(&self, entry: &FeedEntry) -> bool {
        self.0.iter().any(|existing| existing.same_location(entry))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FeedEntry> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a FeedEntries {
    type Item = &'a FeedEntry;
    type IntoIter = std::slice::Iter<'a, FeedEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<FeedEntry> for FeedEntries {
    fn from_iter<I: IntoIterator<Item = FeedEntry>>(iter: I) -> Self {
        let mut entries = FeedEntries::new();
        for entry in iter {
            entries.insert(entry);
        }
        entries
    }
}

/// A deduplicated news source. `identifier` is the dedup key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: String,
    pub format: String,
    /// Serialized as `type`.
    pub kind: String,
    pub subject: String,
    pub description: String,
    pub identifier: String,
    pub encoding: String,
    pub country: String,
    pub region: String,
    pub category: String,
    pub ranking: i64,
    pub language: String,
    pub update_period: String,
    pub update_frequency: i64,
    pub feeds: FeedEntries,
}
