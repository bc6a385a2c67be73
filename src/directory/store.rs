use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::model::{ChannelRecord, Instance};

/// What `Directory::add` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Merged { added: usize },
}

#[derive(Debug, Default)]
struct Channels {
    records: Vec<ChannelRecord>,
    by_identifier: HashMap<String, usize>,
}

/// The channel directory. Non-empty identifiers are unique and records
/// keep the order in which their identifier was first seen.
///
/// All mutation goes through [`Directory::add`], which holds a single lock
/// for the whole lookup and append-or-merge step so it is safe to call
/// from many workers at once.
#[derive(Debug, Default)]
pub struct Directory {
    instance: Instance,
    channels: Mutex<Channels>,
}

impl Directory {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            channels: Mutex::new(Channels::default()),
        }
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    /// Inserts a new channel or merges its feed entries into the channel
    /// that already has the same identifier. Existing scalar fields are
    /// never overwritten.
    ///
    /// A record without an identifier (only a loaded document can hold
    /// one) has nothing to merge on and is always appended.
    pub fn add(&self, record: ChannelRecord) -> AddOutcome {
        let mut channels = self.channels.lock();

        if record.identifier.is_empty() {
            debug!("Appended channel {} without identifier", record.id);
            channels.records.push(record);
            return AddOutcome::Inserted;
        }

        match channels.by_identifier.get(&record.identifier).copied() {
            Some(position) => {
                let existing = &mut channels.records[position];
                let mut added = 0;
                for entry in record.feeds.iter() {
                    if existing.feeds.insert(entry.clone()) {
                        added += 1;
                    }
                }
                debug!(
                    "Merged {} new feed(s) into channel {}",
                    added, existing.identifier
                );
                AddOutcome::Merged { added }
            }
            None => {
                debug!("Inserted channel {}", record.identifier);
                let position = channels.records.len();
                channels
                    .by_identifier
                    .insert(record.identifier.clone(), position);
                channels.records.push(record);
                AddOutcome::Inserted
            }
        }
    }

    /// Position of the record with this identifier.
    pub fn index(&self, identifier: &str) -> Option<usize> {
        self.channels.lock().by_identifier.get(identifier).copied()
    }

    pub fn get(&self, identifier: &str) -> Option<ChannelRecord> {
        let channels = self.channels.lock();
        channels
            .by_identifier
            .get(identifier)
            .map(|&position| channels.records[position].clone())
    }

    pub fn len(&self) -> usize {
        self.channels.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn feed_count(&self) -> usize {
        self.channels
            .lock()
            .records
            .iter()
            .map(|record| record.feeds.len())
            .sum()
    }

    /// Snapshot of every record in store order.
    pub fn channels(&self) -> Vec<ChannelRecord> {
        self.channels.lock().records.clone()
    }

    /// Runs `f` over the records without cloning them.
    pub fn with_channels<R>(&self, f: impl FnOnce(&[ChannelRecord]) -> R) -> R {
        let channels = self.channels.lock();
        f(&channels.records)
    }
}
