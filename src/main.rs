use std::process;
use clap::Parser;

use feed_directory::cli::Cli;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.run().await {
        // A stdin read left blocked by an interrupt would otherwise keep
        // the runtime alive on shutdown.
        Ok(_) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
