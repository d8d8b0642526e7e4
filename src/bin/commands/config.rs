use clap::Args;
use serde::Serialize;
use whoislite::lens::utils::OutputFormat;
use whoislite::WhoisLiteConfig;

use super::print_json;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also print the path of the database file and whether it exists
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Serialize)]
struct ConfigInfo<'a> {
    config_file: String,
    #[serde(flatten)]
    config: &'a WhoisLiteConfig,
    sqlite_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sqlite_exists: Option<bool>,
}

pub fn run(config: &WhoisLiteConfig, args: ConfigArgs, output_format: OutputFormat) {
    let ConfigArgs { verbose } = args;

    let sqlite_path = config.sqlite_path();
    let info = ConfigInfo {
        config_file: WhoisLiteConfig::config_file_path(),
        config,
        sqlite_exists: verbose.then(|| std::path::Path::new(&sqlite_path).exists()),
        sqlite_path,
    };

    if print_json(&info, output_format) {
        return;
    }

    println!("Whoislite Configuration");
    println!("=======================\n");
    println!("Config File:        {}", info.config_file);
    println!("{}", config.summary());
    if let Some(exists) = info.sqlite_exists {
        println!(
            "Database:           {}",
            if exists { "exists" } else { "not created" }
        );
    }

    eprintln!();
    eprintln!("Tips:");
    eprintln!("  Use --format json for machine-readable output");
    eprintln!("  Edit ~/.whoislite/whoislite.toml to customize settings");
    eprintln!("  Environment variables prefixed WHOISLITE_ override the file");
}
