pub mod channel;
pub mod codec;
pub mod model;
pub mod store;

pub use channel::{ChannelBuilder, ChannelDefaults};
pub use model::{ChannelRecord, FeedEntries, FeedEntry, Instance};
pub use store::{AddOutcome, Directory};
