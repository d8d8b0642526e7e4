pub mod config;
pub mod database;
pub mod query;
pub mod sync;

use whoislite::database::WhoisDatabase;
use whoislite::lens::utils::OutputFormat;
use whoislite::WhoisLiteConfig;

/// Open the configured database, creating its directory; exits on failure
pub(crate) fn open_database(config: &WhoisLiteConfig) -> WhoisDatabase {
    if let Err(e) = whoislite::database::ensure_data_dir(&config.data_dir) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    match WhoisDatabase::open(&config.sqlite_path()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open database {}: {}", config.sqlite_path(), e);
            std::process::exit(1);
        }
    }
}

/// Print `value` as JSON when the format asks for it; returns whether it did
pub(crate) fn print_json<T: serde::Serialize>(value: &T, output_format: OutputFormat) -> bool {
    match output_format.to_json(value) {
        Some(Ok(json)) => {
            println!("{}", json);
            true
        }
        Some(Err(e)) => {
            eprintln!("Error serializing output: {}", e);
            true
        }
        None => false,
    }
}
