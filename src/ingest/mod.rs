//! Feed ingestion
//!
//! Drives every feed category over its configured sources, in a fixed
//! order: delegations, AS names, RPSL dumps, geolocations.
//!
//! Each source is probed first; a source whose `Last-Modified` and size
//! match the recorded [`FileMeta`](crate::database::FileMeta) is skipped.
//! Every processed source runs inside its own transaction covering parsing,
//! the sweep, and the metadata write, so a stream that breaks halfway rolls
//! back completely and never drives a sweep with a partial snapshot.
//!
//! Geolocation labels are recomputed from scratch on each pass, so that
//! category is all-or-nothing: when any geo source changed, every geo
//! source is processed. If a source of such a pass fails, the recorded
//! metadata of the whole category is forgotten, so the next run rebuilds
//! it even when nothing changed upstream.

mod asnames;
mod delegation;
mod geo;
mod rpsl;
mod source;

pub use asnames::AsNamesIngestor;
pub use delegation::DelegationIngestor;
pub use geo::{merge_label, GeoIngestor};
pub use rpsl::{content_digest, RpslBlock, RpslBlockParser, RpslIngestor, RPSL_OBJECT_TYPES};
pub use source::{DefaultSourceProvider, SourceFile, SourceMeta, SourceProvider};

use crate::config::WhoisLiteConfig;
use crate::database::{FileMetaRepository, WhoisDatabase};
use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::fmt;
use std::io::BufRead;
use tracing::{debug, error, info, warn};

/// Store writes are buffered and flushed in batches of this size
pub const BATCH_SIZE: usize = 1000;

/// Free pages tolerated before an incremental vacuum step runs
pub const VACUUM_THRESHOLD_PAGES: u64 = 10_000;

/// Feed categories, in processing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// RIR delegated-extended files
    Extended,
    /// AS name list (`asn.txt`)
    Asnames,
    /// RPSL object dumps
    Rpsl,
    /// Geolocation CSV feeds
    Geolocations,
}

impl FeedKind {
    pub const ALL: [FeedKind; 4] = [
        FeedKind::Extended,
        FeedKind::Asnames,
        FeedKind::Rpsl,
        FeedKind::Geolocations,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeedKind::Extended => "extended",
            FeedKind::Asnames => "asnames",
            FeedKind::Rpsl => "rpsl",
            FeedKind::Geolocations => "geolocations",
        }
    }

    /// Configured source URLs (or local paths) for this category
    pub fn sources<'a>(&self, config: &'a WhoisLiteConfig) -> &'a [String] {
        match self {
            FeedKind::Extended => &config.extended_urls,
            FeedKind::Asnames => &config.asnames_urls,
            FeedKind::Rpsl => &config.rpsl_urls,
            FeedKind::Geolocations => &config.geolocation_urls,
        }
    }

    /// Whether one changed source forces reprocessing of the whole category
    pub fn all_or_nothing(&self) -> bool {
        matches!(self, FeedKind::Geolocations)
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Counters produced by syncing one source file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub lines: u64,
    pub skipped: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub index_added: u64,
    pub index_removed: u64,
}

impl SyncStats {
    /// Number of store mutations this sync performed
    pub fn writes(&self) -> u64 {
        self.inserted + self.updated + self.deleted + self.index_added + self.index_removed
    }

    pub fn merge(&mut self, other: &SyncStats) {
        self.lines += other.lines;
        self.skipped += other.skipped;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.index_added += other.index_added;
        self.index_removed += other.index_removed;
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines, {} skipped, {} inserted, {} updated, {} unchanged, {} deleted, index +{}/-{}",
            self.lines,
            self.skipped,
            self.inserted,
            self.updated,
            self.unchanged,
            self.deleted,
            self.index_added,
            self.index_removed
        )
    }
}

/// A parser/synchronizer for one feed category
///
/// An ingestor instance lives for one pass over the category's sources.
/// `sync_file` is always called inside a transaction owned by the pipeline.
pub trait FeedIngestor {
    fn kind(&self) -> FeedKind;

    /// Called once before the first file of a pass
    fn begin_pass(&mut self, _conn: &Connection) -> Result<()> {
        Ok(())
    }

    /// Parse one source file and synchronize the store with it
    ///
    /// `source` identifies the file (its URL or path) for ingestors that
    /// track which rows each file owns.
    fn sync_file(
        &mut self,
        conn: &Connection,
        source: &str,
        reader: &mut dyn BufRead,
    ) -> Result<SyncStats>;

    /// Called when the file's transaction was rolled back
    fn discard_file(&mut self) {}
}

/// What happened to one source during a sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SourceOutcome {
    Processed { stats: SyncStats },
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub kind: FeedKind,
    pub url: String,
    pub outcome: SourceOutcome,
}

/// Result of a full sync run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub sources: Vec<SourceReport>,
}

impl SyncReport {
    pub fn processed(&self) -> usize {
        self.count(|o| matches!(o, SourceOutcome::Processed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SourceOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SourceOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&SourceOutcome) -> bool) -> usize {
        self.sources.iter().filter(|s| pred(&s.outcome)).count()
    }

    /// Aggregated counters of every processed source of a category
    pub fn totals(&self, kind: FeedKind) -> SyncStats {
        let mut total = SyncStats::default();
        for report in self.sources.iter().filter(|s| s.kind == kind) {
            if let SourceOutcome::Processed { stats } = &report.outcome {
                total.merge(stats);
            }
        }
        total
    }
}

/// Options for a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Process sources even when their metadata is unchanged
    pub force: bool,
    /// Categories to sync, in [`FeedKind::ALL`] order
    pub kinds: Vec<FeedKind>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            kinds: FeedKind::ALL.to_vec(),
        }
    }
}

/// Sequential sync pipeline over a whois database
pub struct SyncPipeline<'a, P: SourceProvider> {
    db: &'a WhoisDatabase,
    provider: P,
}

impl<'a, P: SourceProvider> SyncPipeline<'a, P> {
    pub fn new(db: &'a WhoisDatabase, provider: P) -> Self {
        Self { db, provider }
    }

    /// Sync every requested category from the configured sources
    pub fn run(&self, config: &WhoisLiteConfig, options: &SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for kind in FeedKind::ALL {
            if !options.kinds.contains(&kind) {
                continue;
            }
            let urls = kind.sources(config);
            if urls.is_empty() {
                debug!("no {} sources configured", kind);
                continue;
            }

            let mut ingestor = new_ingestor(kind);
            let reports = self.sync_feed(ingestor.as_mut(), urls, options.force)?;
            report.sources.extend(reports);
        }

        info!(
            "sync finished: {} processed, {} skipped, {} failed",
            report.processed(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    /// Sync one category's sources with the given ingestor
    pub fn sync_feed(
        &self,
        ingestor: &mut dyn FeedIngestor,
        urls: &[String],
        force: bool,
    ) -> Result<Vec<SourceReport>> {
        let kind = ingestor.kind();
        let mut reports = Vec::with_capacity(urls.len());

        let mut probed = Vec::with_capacity(urls.len());
        for url in urls {
            match self.provider.probe(url) {
                Ok(meta) => {
                    let changed = force || self.has_changed(url, &meta)?;
                    probed.push((url, meta, changed));
                }
                Err(e) => {
                    error!("failed to probe {}: {}", url, e);
                    reports.push(SourceReport {
                        kind,
                        url: url.clone(),
                        outcome: SourceOutcome::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        if kind.all_or_nothing() && probed.iter().any(|(_, _, changed)| *changed) {
            for entry in probed.iter_mut() {
                entry.2 = true;
            }
        }

        let pass_started = probed.iter().any(|(_, _, changed)| *changed);
        if pass_started {
            let tx = self.db.conn().transaction()?;
            ingestor.begin_pass(&tx)?;
            tx.commit()
                .map_err(|e| anyhow!("Failed to commit start of {} pass: {}", kind, e))?;
        }

        for (url, meta, changed) in probed {
            let outcome = if changed {
                self.sync_source(ingestor, url, &meta)
            } else {
                info!("{} unchanged, skipping", url);
                SourceOutcome::Skipped
            };
            reports.push(SourceReport {
                kind,
                url: url.clone(),
                outcome,
            });
        }

        let failed = reports
            .iter()
            .any(|r| matches!(r.outcome, SourceOutcome::Failed { .. }));
        if kind.all_or_nothing() && pass_started && failed {
            warn!("{} pass incomplete, forgetting metadata of all its sources", kind);
            self.forget_sources(urls);
        }

        Ok(reports)
    }

    fn forget_sources(&self, urls: &[String]) {
        let repo = self.db.file_meta();
        for url in urls {
            if let Err(e) = repo.forget(url) {
                error!("{}", e);
            }
        }
    }

    fn has_changed(&self, url: &str, meta: &SourceMeta) -> Result<bool> {
        // Without a Last-Modified value there is nothing reliable to compare
        if meta.last_modified.is_empty() {
            return Ok(true);
        }
        let stored = self.db.file_meta().get(url)?;
        Ok(!stored.is_some_and(|s| s.matches(&meta.last_modified, meta.size)))
    }

    fn sync_source(
        &self,
        ingestor: &mut dyn FeedIngestor,
        url: &str,
        meta: &SourceMeta,
    ) -> SourceOutcome {
        info!("syncing {} from {}", ingestor.kind(), url);

        match self.sync_source_inner(ingestor, url, meta) {
            Ok(stats) => {
                info!("{}: {}", url, stats);
                if let Err(e) = self.db.conn().incremental_vacuum(VACUUM_THRESHOLD_PAGES) {
                    warn!("incremental vacuum failed: {}", e);
                }
                SourceOutcome::Processed { stats }
            }
            Err(e) => {
                error!("failed to sync {}: {}", url, e);
                ingestor.discard_file();
                SourceOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    fn sync_source_inner(
        &self,
        ingestor: &mut dyn FeedIngestor,
        url: &str,
        meta: &SourceMeta,
    ) -> Result<SyncStats> {
        // Dropped at the end of this scope on every path, removing any temp file
        let source = self.provider.fetch(url)?;
        let mut reader = source.reader()?;

        // Rolled back on drop unless committed
        let tx = self.db.conn().transaction()?;
        let stats = ingestor.sync_file(&tx, url, reader.as_mut())?;
        FileMetaRepository::new(&tx).record(url, &meta.last_modified, meta.size)?;
        tx.commit()
            .map_err(|e| anyhow!("Failed to commit {}: {}", url, e))?;

        Ok(stats)
    }
}

fn new_ingestor(kind: FeedKind) -> Box<dyn FeedIngestor> {
    match kind {
        FeedKind::Extended => Box::new(DelegationIngestor::new()),
        FeedKind::Asnames => Box::new(AsNamesIngestor::new()),
        FeedKind::Rpsl => Box::new(RpslIngestor::new()),
        FeedKind::Geolocations => Box::new(GeoIngestor::new()),
    }
}

/// Feed every line of `reader` to `f`, without the line terminator
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected; RIR
/// dumps routinely carry Latin-1 text. Read errors abort the file.
pub(crate) fn for_each_line(
    reader: &mut dyn BufRead,
    mut f: impl FnMut(&str) -> Result<()>,
) -> Result<u64> {
    let mut buf = Vec::new();
    let mut count = 0;
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| anyhow!("Failed to read feed after {} lines: {}", count, e))?;
        if read == 0 {
            break;
        }
        count += 1;
        let line = String::from_utf8_lossy(&buf);
        f(line.trim_end_matches(|c: char| c == '\n' || c == '\r'))?;
    }
    Ok(count)
}

/// Run `f` inside a savepoint; its changes are rolled back if it fails
pub(crate) fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))
        .map_err(|e| anyhow!("Failed to open savepoint {}: {}", name, e))?;
    match f() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))
                .map_err(|e| anyhow!("Failed to release savepoint {}: {}", name, e))?;
            Ok(value)
        }
        Err(e) => {
            conn.execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name))
                .map_err(|re| anyhow!("Failed to roll back savepoint {}: {}", name, re))?;
            Err(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::io::Cursor;

    /// Run one file through an ingestor inside a transaction, like the pipeline does
    pub fn sync_text(
        db: &WhoisDatabase,
        ingestor: &mut dyn FeedIngestor,
        text: &str,
    ) -> SyncStats {
        sync_source_text(db, ingestor, "mem://test", text)
    }

    /// Like [`sync_text`], with an explicit source name
    pub fn sync_source_text(
        db: &WhoisDatabase,
        ingestor: &mut dyn FeedIngestor,
        source: &str,
        text: &str,
    ) -> SyncStats {
        let tx = db.conn().transaction().unwrap();
        let stats = ingestor
            .sync_file(&tx, source, &mut Cursor::new(text.as_bytes().to_vec()))
            .unwrap();
        tx.commit().unwrap();
        stats
    }

    /// In-memory source provider keyed by URL
    #[derive(Default)]
    pub struct StaticProvider {
        pub files: HashMap<String, (SourceMeta, Vec<u8>)>,
        /// Sources whose metadata is served but whose download fails
        pub unreachable: HashSet<String>,
    }

    impl StaticProvider {
        pub fn add(&mut self, url: &str, last_modified: &str, body: &[u8]) {
            self.files.insert(
                url.to_string(),
                (
                    SourceMeta {
                        last_modified: last_modified.to_string(),
                        size: body.len() as u64,
                    },
                    body.to_vec(),
                ),
            );
        }
    }

    impl SourceProvider for StaticProvider {
        fn probe(&self, url: &str) -> Result<SourceMeta> {
            self.files
                .get(url)
                .map(|(meta, _)| meta.clone())
                .ok_or_else(|| anyhow!("no such source {}", url))
        }

        fn fetch(&self, url: &str) -> Result<SourceFile> {
            if self.unreachable.contains(url) {
                return Err(anyhow!("connection reset while fetching {}", url));
            }
            let (_, body) = self
                .files
                .get(url)
                .ok_or_else(|| anyhow!("no such source {}", url))?;
            SourceFile::from_bytes(body)
        }
    }
}
