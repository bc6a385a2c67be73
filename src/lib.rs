pub mod cli;
pub mod config;
pub mod directory;
pub mod error;
pub mod feed;
pub mod pipeline;

pub use config::Config;
pub use directory::{AddOutcome, ChannelBuilder, ChannelRecord, Directory, FeedEntry, Instance};
pub use error::{Error, Result};
pub use feed::{FeedDocument, FeedFetcher, FeedParser};
pub use pipeline::{cancel_pair, FetchPipeline, PipelineReport};
