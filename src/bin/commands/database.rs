use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use whoislite::config::{format_size, get_sqlite_info, SqliteDatabaseInfo};
use whoislite::database::{FileMeta, SchemaManager};
use whoislite::lens::utils::{truncate_name, OutputFormat, DEFAULT_URL_MAX_LEN};
use whoislite::WhoisLiteConfig;

use super::{open_database, print_json};

/// Arguments for the Database command
#[derive(Args)]
pub struct DatabaseArgs {
    #[clap(subcommand)]
    pub command: Option<DatabaseCommands>,
}

/// Database subcommands
#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Show database status (default when no subcommand)
    Status,

    /// List synced upstream sources and their recorded metadata
    Sources,

    /// Clear stored data
    Clear {
        /// What to clear: everything, or only source metadata (forces a full resync)
        #[clap(value_enum, default_value_t = ClearTarget::All)]
        target: ClearTarget,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClearTarget {
    All,
    Sources,
}

#[derive(Tabled)]
struct SourceRow {
    source: String,
    last_modified: String,
    size: String,
}

#[derive(Serialize)]
struct ClearResult {
    target: &'static str,
    cleared: usize,
}

pub fn run(config: &WhoisLiteConfig, args: DatabaseArgs, output_format: OutputFormat) {
    match args.command {
        None | Some(DatabaseCommands::Status) => run_status(config, output_format),
        Some(DatabaseCommands::Sources) => run_sources(config, output_format),
        Some(DatabaseCommands::Clear { target, yes }) => {
            run_clear(config, target, yes, output_format)
        }
    }
}

fn run_status(config: &WhoisLiteConfig, output_format: OutputFormat) {
    let sqlite_info = get_sqlite_info(config);
    if !print_json(&sqlite_info, output_format) {
        print_status(&sqlite_info);
    }
}

fn print_status(sqlite: &SqliteDatabaseInfo) {
    println!("Whoislite Database Status");
    println!("=========================\n");

    println!("SQLite Database:");
    println!("  Path:           {}", sqlite.path);
    println!(
        "  Status:         {}",
        if sqlite.exists {
            "exists"
        } else {
            "not created"
        }
    );
    if let Some(size) = sqlite.size_bytes {
        println!("  Size:           {}", format_size(size));
    }
    println!(
        "  Schema:         {}",
        if sqlite.schema_initialized {
            format!("initialized (v{})", sqlite.schema_version.unwrap_or(0))
        } else {
            "not initialized".to_string()
        }
    );

    if let Some(counts) = &sqlite.counts {
        println!();
        println!("Records:");
        println!("  ASNs:           {}", counts.asn);
        println!("  IPv4 networks:  {}", counts.ipv4);
        println!("  IPv6 networks:  {}", counts.ipv6);
        println!("  RPSL objects:   {}", counts.rpsl.objects);
        println!("  Route origins:  {}", counts.rpsl.origins);
        println!("  Mnt-by refs:    {}", counts.rpsl.mntby);
        println!("  Geo addresses:  {}", counts.geo);
        println!("  Sources:        {}", counts.sources);
    }

    eprintln!();
    eprintln!("Tips:");
    eprintln!("  Use 'whoislite sync' to populate or refresh the mirror");
    eprintln!("  Use 'whoislite database sources' to see per-source sync state");
}

fn run_sources(config: &WhoisLiteConfig, output_format: OutputFormat) {
    let db = open_database(config);
    let sources: Vec<FileMeta> = match db.file_meta().list() {
        Ok(list) => list,
        Err(e) => {
            eprintln!("Failed to list sources: {}", e);
            std::process::exit(1);
        }
    };

    if print_json(&sources, output_format) {
        return;
    }
    if sources.is_empty() {
        println!("No sources synced yet. Run 'whoislite sync' first.");
        return;
    }

    let rows: Vec<SourceRow> = sources
        .iter()
        .map(|meta| SourceRow {
            source: truncate_name(&meta.url, DEFAULT_URL_MAX_LEN),
            last_modified: if meta.last_modified.is_empty() {
                "-".to_string()
            } else {
                meta.last_modified.clone()
            },
            size: format_size(meta.file_size),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn run_clear(config: &WhoisLiteConfig, target: ClearTarget, yes: bool, output_format: OutputFormat) {
    if !yes {
        let what = match target {
            ClearTarget::All => "all mirrored data",
            ClearTarget::Sources => "recorded source metadata",
        };
        eprintln!("This will delete {} from {}.", what, config.sqlite_path());
        eprintln!("Re-run with --yes to confirm.");
        std::process::exit(1);
    }

    let db = open_database(config);
    let result = match target {
        ClearTarget::All => {
            let schema = SchemaManager::new(db.connection());
            schema.reset().and_then(|_| schema.initialize()).map(|_| ClearResult {
                target: "all",
                cleared: 0,
            })
        }
        ClearTarget::Sources => db.file_meta().clear().map(|cleared| ClearResult {
            target: "sources",
            cleared,
        }),
    };

    match result {
        Ok(result) => {
            if !print_json(&result, output_format) {
                match target {
                    ClearTarget::All => println!("Database cleared."),
                    ClearTarget::Sources => {
                        println!("Cleared metadata of {} source(s).", result.cleared)
                    }
                }
            }
        }
        Err(e) => {
            eprintln!("Failed to clear database: {}", e);
            std::process::exit(1);
        }
    }
}
