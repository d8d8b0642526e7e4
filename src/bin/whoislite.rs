#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::{Parser, Subcommand};
use tracing::Level;
use whoislite::lens::utils::OutputFormat;
use whoislite::WhoisLiteConfig;

mod commands;

use commands::config::ConfigArgs;
use commands::database::DatabaseArgs;
use commands::query::QueryArgs;
use commands::sync::SyncArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.whoislite/whoislite.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output format: text (default), json, json-pretty
    #[clap(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Shortcut for --format json
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the local mirror with the configured upstream sources.
    Sync(SyncArgs),

    /// Answer a whois-style query from the local mirror.
    Query(QueryArgs),

    /// Show or manage the local database.
    Database(DatabaseArgs),

    /// Show the active configuration.
    Config(ConfigArgs),
}

fn main() {
    let cli = Cli::parse();

    let config = match WhoisLiteConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let output_format = if cli.json {
        OutputFormat::Json
    } else {
        cli.format
    };

    match cli.command {
        Commands::Sync(args) => commands::sync::run(&config, args, output_format),
        Commands::Query(args) => commands::query::run(&config, args, output_format),
        Commands::Database(args) => commands::database::run(&config, args, output_format),
        Commands::Config(args) => commands::config::run(&config, args, output_format),
    }
}
