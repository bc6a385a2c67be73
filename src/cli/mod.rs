pub mod commands;

use clap::{Args, Parser, Subcommand};
use crate::config::Config;
use crate::error::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "feed-directory")]
#[command(about = "Build a deduplicated channel directory from RSS/Atom feed URLs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Fetch feed URLs (one per line) and merge them into a directory
    Merge(MergeArgs),

    /// Summarize an existing directory file
    Inspect {
        /// Directory file to read
        path: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct MergeArgs {
    /// Existing directory to load and extend
    #[arg(short, long)]
    pub directory: Option<PathBuf>,

    /// Where to write the directory (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Build a private directory (IDs prefixed with P_)
    #[arg(short, long)]
    pub private: bool,

    /// Number of concurrent fetch workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Read feed URLs from this file instead of stdin
    #[arg(short, long)]
    pub input: Option<PathBuf>,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        if let Commands::Completions { shell } = &self.command {
            commands::generate_completions(*shell);
            return Ok(());
        }

        let config = Config::resolve(self.config.as_deref())?;
        let _log_guard = commands::init_logging(self.debug, self.verbose, &config.logging)?;

        match self.command {
            Commands::Init { force } => commands::init(self.config, force),
            Commands::Merge(args) => commands::merge(args, &config).await,
            Commands::Inspect { path, json } => commands::inspect(&path, json, &config),
            Commands::Completions { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_merge_flags() {
        let cli = Cli::try_parse_from([
            "feed-directory",
            "merge",
            "-d",
            "old.xml",
            "-o",
            "new.xml",
            "-p",
            "-w",
            "8",
            "-i",
            "urls.txt",
        ])
        .unwrap();

        match cli.command {
            Commands::Merge(args) => {
                assert_eq!(args.directory, Some(PathBuf::from("old.xml")));
                assert_eq!(args.output, Some(PathBuf::from("new.xml")));
                assert!(args.private);
                assert_eq!(args.workers, Some(8));
                assert_eq!(args.input, Some(PathBuf::from("urls.txt")));
            }
            other => panic!("Expected merge, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "feed-directory",
            "inspect",
            "dir.xml",
            "--json",
            "--debug",
            "-c",
            "cfg.toml",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("cfg.toml")));
        assert!(matches!(cli.command, Commands::Inspect { json: true, .. }));
    }
}
