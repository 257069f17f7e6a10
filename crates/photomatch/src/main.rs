//! Photomatch CLI - Find marketplace listings that look like your photos.
//!
//! Photomatch uploads up to five photos to the eBay image search, lists the
//! closest listings for each, and fetches listing descriptions on demand.
//!
//! # Usage
//!
//! ```bash
//! # Match two photos
//! photomatch search mug.jpg lamp.png
//!
//! # JSON output with the top listing's description per photo
//! photomatch search mug.jpg --format json --describe
//!
//! # Describe one listing
//! photomatch describe "v1|123456789|0"
//!
//! # View configuration
//! photomatch config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Photomatch - Find marketplace listings that look like your photos.
#[derive(Parser, Debug)]
#[command(name = "photomatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Search the marketplace for listings matching one to five photos
    Search(cli::search::SearchArgs),

    /// Print the description of one listing
    Describe(cli::describe::DescribeArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so use eprintln for config warnings.
    let config = match photomatch_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `photomatch config path`."
            );
            photomatch_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Photomatch v{}", photomatch_core::VERSION);

    match cli.command {
        Commands::Search(args) => cli::search::execute(args, config).await,
        Commands::Describe(args) => cli::describe::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}
