use clap::Args;
use serde::Serialize;
use std::time::Instant;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use whoislite::ingest::{
    DefaultSourceProvider, FeedKind, SourceOutcome, SyncOptions, SyncPipeline, SyncReport,
};
use whoislite::lens::utils::{truncate_name, OutputFormat, DEFAULT_URL_MAX_LEN};
use whoislite::WhoisLiteConfig;

use super::{open_database, print_json};

/// Arguments for the Sync command
#[derive(Args)]
pub struct SyncArgs {
    /// Process every source even when its upstream metadata is unchanged
    #[clap(long)]
    pub force: bool,

    /// Feed categories to sync (repeatable); all by default
    #[clap(short, long, value_enum)]
    pub kind: Vec<FeedKind>,
}

#[derive(Tabled)]
struct SourceRow {
    kind: String,
    source: String,
    status: String,
    lines: String,
    inserted: String,
    updated: String,
    deleted: String,
    skipped: String,
}

#[derive(Serialize)]
struct SyncOutput<'a> {
    elapsed_secs: f64,
    processed: usize,
    skipped: usize,
    failed: usize,
    #[serde(flatten)]
    report: &'a SyncReport,
}

pub fn run(config: &WhoisLiteConfig, args: SyncArgs, output_format: OutputFormat) {
    let SyncArgs { force, kind } = args;

    let db = open_database(config);
    let options = SyncOptions {
        force,
        kinds: if kind.is_empty() {
            FeedKind::ALL.to_vec()
        } else {
            kind
        },
    };

    let start = Instant::now();
    let provider = DefaultSourceProvider::from_config(config);
    let report = match SyncPipeline::new(&db, provider).run(config, &options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Sync failed: {}", e);
            std::process::exit(1);
        }
    };
    let elapsed = start.elapsed();

    let output = SyncOutput {
        elapsed_secs: elapsed.as_secs_f64(),
        processed: report.processed(),
        skipped: report.skipped(),
        failed: report.failed(),
        report: &report,
    };
    if !print_json(&output, output_format) {
        print_report(&report);
        println!(
            "\n{} processed, {} unchanged, {} failed in {:.1}s",
            output.processed, output.skipped, output.failed, output.elapsed_secs
        );
    }

    if report.failed() > 0 {
        std::process::exit(1);
    }
}

fn print_report(report: &SyncReport) {
    if report.sources.is_empty() {
        println!("No sources configured.");
        return;
    }

    let rows: Vec<SourceRow> = report
        .sources
        .iter()
        .map(|source| {
            let url = truncate_name(&source.url, DEFAULT_URL_MAX_LEN);
            let blank = || "-".to_string();
            match &source.outcome {
                SourceOutcome::Processed { stats } => SourceRow {
                    kind: source.kind.to_string(),
                    source: url,
                    status: "processed".to_string(),
                    lines: stats.lines.to_string(),
                    inserted: stats.inserted.to_string(),
                    updated: stats.updated.to_string(),
                    deleted: stats.deleted.to_string(),
                    skipped: stats.skipped.to_string(),
                },
                SourceOutcome::Skipped => SourceRow {
                    kind: source.kind.to_string(),
                    source: url,
                    status: "unchanged".to_string(),
                    lines: blank(),
                    inserted: blank(),
                    updated: blank(),
                    deleted: blank(),
                    skipped: blank(),
                },
                SourceOutcome::Failed { error } => SourceRow {
                    kind: source.kind.to_string(),
                    source: url,
                    status: format!("failed: {}", truncate_name(error, DEFAULT_URL_MAX_LEN)),
                    lines: blank(),
                    inserted: blank(),
                    updated: blank(),
                    deleted: blank(),
                    skipped: blank(),
                },
            }
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
}
