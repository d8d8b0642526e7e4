use clap::Args;
use whoislite::lens::utils::OutputFormat;
use whoislite::lens::whois::{WhoisLens, WhoisQueryArgs};
use whoislite::WhoisLiteConfig;

use super::{open_database, print_json};

/// Arguments for the Query command
#[derive(Args)]
pub struct QueryArgs {
    #[clap(flatten)]
    pub query: WhoisQueryArgs,

    /// Exit with status 1 when nothing matches
    #[clap(long)]
    pub strict: bool,
}

pub fn run(config: &WhoisLiteConfig, args: QueryArgs, output_format: OutputFormat) {
    let QueryArgs { query, strict } = args;

    let db = open_database(config);
    let lens = WhoisLens::new(&db);

    let answer = match lens.query(&query) {
        Ok(answer) => answer,
        Err(e) => {
            eprintln!("Query failed: {}", e);
            std::process::exit(1);
        }
    };

    if !print_json(&answer, output_format) {
        if answer.is_empty() {
            eprintln!("No {} entries found for '{}'", query.query_type, query.key);
        } else {
            print!("{}", answer);
        }
    }

    if strict && answer.is_empty() {
        std::process::exit(1);
    }
}
