use std::path::PathBuf;
use clap::{Parser, Subcommand};
use mediavault_lib::cli;
use mediavault_lib::config::{AppConfig, FlatConfig};
use mediavault_lib::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "mediavault", version, about = "Deduplicating media store with range delivery and tag search")]
struct Cli {
    #[command(flatten)]
    config: FlatConfig,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Ingest local files
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, help = "Uploader name [default: first configured API token user]")]
        user: Option<String>,
    },
    /// Delete every cached scaled variant
    FlushCache,
    /// Probe image and video assets that have no recorded dimensions
    Backfill,
    /// Print tag usage counts
    Tags {
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    setup_logger(&args.config.log_level)?;
    let config = AppConfig::new(args.config)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => cli::serve(config).await,
        Command::Import { files, user } => cli::import(config, files, user).await,
        Command::FlushCache => cli::flush_cache(config).await,
        Command::Backfill => cli::backfill(config).await,
        Command::Tags { query } => cli::print_tags(config, query).await,
    }
}
