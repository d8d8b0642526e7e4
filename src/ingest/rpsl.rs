//! RPSL dump synchronization
//!
//! Dumps are sequences of blank-line separated blocks; the first line of a
//! block names the object type and its primary value:
//!
//! ```text
//! aut-num:        AS64496
//! as-name:        EXAMPLE-AS
//! mnt-by:         MAINT-EXAMPLE
//!
//! route:          192.0.2.0/24
//! origin:         AS64496
//! ```
//!
//! Only the types in [`RPSL_OBJECT_TYPES`] are stored. Unchanged blocks
//! (same SHA-256 digest) are not rewritten. Every row records the dump that
//! last listed it. Objects, origin pairs and maintainer references that
//! disappeared from the dump are swept at the end of the file, restricted
//! to rows owned by that dump and to the object types it contained, so
//! neither per-registry dumps nor split dumps (one type per file) delete
//! each other's rows.

use super::{for_each_line, with_savepoint, FeedIngestor, FeedKind, SyncStats, BATCH_SIZE};
use crate::database::RpslRepository;
use anyhow::{anyhow, Result};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::io::BufRead;
use tracing::{debug, error, info, warn};

/// Object types persisted by the mirror
pub const RPSL_OBJECT_TYPES: [&str; 7] = [
    "aut-num",
    "as-set",
    "organisation",
    "mntner",
    "role",
    "route",
    "route6",
];

/// Object types whose `mnt-by:` references are indexed
const MNTBY_OWNER_TYPES: [&str; 3] = ["aut-num", "as-set", "role"];

const SNAPSHOT_TABLES: &str = r#"
    CREATE TEMP TABLE IF NOT EXISTS snapshot_rpsl (
        key TEXT NOT NULL,
        value TEXT NOT NULL COLLATE NOCASE,
        UNIQUE (key, value)
    );
    CREATE TEMP TABLE IF NOT EXISTS snapshot_origin (
        origin TEXT NOT NULL COLLATE NOCASE,
        route TEXT NOT NULL COLLATE NOCASE,
        UNIQUE (origin, route)
    );
    CREATE TEMP TABLE IF NOT EXISTS snapshot_mntby (
        key TEXT NOT NULL,
        value TEXT NOT NULL COLLATE NOCASE,
        mntby TEXT NOT NULL COLLATE NOCASE,
        UNIQUE (mntby, key, value)
    );
    DELETE FROM temp.snapshot_rpsl;
    DELETE FROM temp.snapshot_origin;
    DELETE FROM temp.snapshot_mntby;
"#;

/// Hex SHA-256 digest of a block's text
pub fn content_digest(text: &str) -> String {
    let mut sha = Sha256::new();
    sha.update(text.as_bytes());
    hex::encode(sha.finalize())
}

/// A complete RPSL block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpslBlock {
    /// Object type, e.g. `aut-num`
    pub key: String,
    /// Primary value, e.g. `AS64496`
    pub value: String,
    /// Trimmed lines, each newline-terminated
    pub text: String,
}

impl RpslBlock {
    /// Values of every `name:` attribute, with trailing `#` remarks removed
    pub fn attribute_values(&self, name: &str) -> Vec<&str> {
        self.text
            .lines()
            .filter_map(|line| {
                let (attr, value) = line.split_once(':')?;
                if !attr.trim().eq_ignore_ascii_case(name) {
                    return None;
                }
                let value = value.split('#').next().unwrap_or_default().trim();
                (!value.is_empty()).then_some(value)
            })
            .collect()
    }
}

#[derive(Debug)]
enum ParserState {
    Idle,
    Accumulating { key: String, value: String, text: String },
    /// Inside a rejected block; lines are dropped until the next blank line
    SuppressingDuplicate,
}

/// Line-fed block splitter
///
/// Feed lines in order with [`feed`](Self::feed); call
/// [`finish`](Self::finish) at end of input to flush the last block.
/// A block whose (type, value) was already opened in this input is dropped.
#[derive(Debug)]
pub struct RpslBlockParser {
    state: ParserState,
    seen: HashSet<(String, String)>,
}

impl Default for RpslBlockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RpslBlockParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Idle,
            seen: HashSet::new(),
        }
    }

    /// Consume one line, returning the block it completed, if any
    pub fn feed(&mut self, line: &str) -> Option<RpslBlock> {
        if line.starts_with('#') || line.starts_with('%') {
            return None;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return self.finish();
        }

        if matches!(self.state, ParserState::Idle) {
            self.open(trimmed);
        } else if let ParserState::Accumulating { text, .. } = &mut self.state {
            text.push_str(trimmed);
            text.push('\n');
        }
        None
    }

    /// Complete the block in progress, if any
    pub fn finish(&mut self) -> Option<RpslBlock> {
        match std::mem::replace(&mut self.state, ParserState::Idle) {
            ParserState::Accumulating { key, value, text } => Some(RpslBlock { key, value, text }),
            _ => None,
        }
    }

    fn open(&mut self, first_line: &str) {
        let (key, value) = match first_line.split_once(char::is_whitespace) {
            Some((key, value)) => (key.trim_end_matches(':'), value.trim()),
            None => (first_line.trim_end_matches(':'), ""),
        };
        if value.is_empty() {
            warn!("RPSL block '{}' has no primary value, skipping", first_line);
            self.state = ParserState::SuppressingDuplicate;
            return;
        }
        if !self.seen.insert((key.to_string(), value.to_lowercase())) {
            warn!("duplicate RPSL object {} {}, skipping", key, value);
            self.state = ParserState::SuppressingDuplicate;
            return;
        }

        let mut text = String::with_capacity(256);
        text.push_str(first_line);
        text.push('\n');
        self.state = ParserState::Accumulating {
            key: key.to_string(),
            value: value.to_string(),
            text,
        };
    }
}

/// Buffered store operation
#[derive(Debug)]
enum PendingWrite {
    Insert(RpslBlock),
    Update(RpslBlock),
    Seen { key: String, value: String },
    Claim { key: String, value: String },
    Origin { origin: String, route: String },
    MntBy { key: String, value: String, mntby: String },
}

/// Ingestor for RPSL dumps
#[derive(Default)]
pub struct RpslIngestor {
    pending: Vec<PendingWrite>,
    observed: BTreeSet<String>,
    source: String,
}

impl RpslIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a block with the store and queue the resulting writes
    fn save(&mut self, conn: &Connection, block: RpslBlock, stats: &mut SyncStats) -> Result<()> {
        if !RPSL_OBJECT_TYPES.contains(&block.key.as_str()) {
            stats.skipped += 1;
            return Ok(());
        }
        if !self.observed.contains(&block.key) {
            self.observed.insert(block.key.clone());
        }

        if block.key == "route" || block.key == "route6" {
            for origin in block.attribute_values("origin") {
                self.pending.push(PendingWrite::Origin {
                    origin: origin.to_string(),
                    route: block.value.clone(),
                });
            }
        } else if MNTBY_OWNER_TYPES.contains(&block.key.as_str()) {
            for mntby in block.attribute_values("mnt-by") {
                for id in mntby.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    self.pending.push(PendingWrite::MntBy {
                        key: block.key.clone(),
                        value: block.value.clone(),
                        mntby: id.to_string(),
                    });
                }
            }
        }

        self.pending.push(PendingWrite::Seen {
            key: block.key.clone(),
            value: block.value.clone(),
        });

        match RpslRepository::new(conn).get_owned_block(&block.key, &block.value)? {
            Some((stored, owner)) if content_digest(&stored) == content_digest(&block.text) => {
                stats.unchanged += 1;
                if owner != self.source {
                    self.pending.push(PendingWrite::Claim {
                        key: block.key,
                        value: block.value,
                    });
                }
            }
            Some(_) => self.pending.push(PendingWrite::Update(block)),
            None => self.pending.push(PendingWrite::Insert(block)),
        }

        if self.pending.len() >= BATCH_SIZE {
            self.flush(conn, stats);
        }
        Ok(())
    }

    /// Apply buffered writes; a failing element is logged and skipped
    fn flush(&mut self, conn: &Connection, stats: &mut SyncStats) {
        if self.pending.is_empty() {
            return;
        }
        debug!("flushing {} RPSL writes", self.pending.len());

        let repo = RpslRepository::new(conn);
        let source = self.source.as_str();
        for write in self.pending.drain(..) {
            let result = match &write {
                PendingWrite::Insert(block) => repo
                    .insert(&block.key, &block.value, &block.text, source)
                    .map(|_| stats.inserted += 1),
                PendingWrite::Update(block) => repo
                    .update(&block.key, &block.value, &block.text, source)
                    .map(|_| stats.updated += 1),
                PendingWrite::Claim { key, value } => repo.claim(key, value, source),
                PendingWrite::Seen { key, value } => conn
                    .execute(
                        "INSERT OR IGNORE INTO temp.snapshot_rpsl (key, value) VALUES (?1, ?2)",
                        [key, value],
                    )
                    .map(|_| ())
                    .map_err(|e| anyhow!("Failed to record snapshot of {} {}: {}", key, value, e)),
                PendingWrite::Origin { origin, route } => {
                    repo.add_origin(origin, route, source).and_then(|added| {
                        if added {
                            stats.index_added += 1;
                        }
                        conn.execute(
                            "INSERT OR IGNORE INTO temp.snapshot_origin (origin, route)
                             VALUES (?1, ?2)",
                            [origin, route],
                        )
                        .map(|_| ())
                        .map_err(|e| anyhow!("Failed to record snapshot of {}: {}", route, e))
                    })
                }
                PendingWrite::MntBy { key, value, mntby } => {
                    repo.add_mntby(key, value, mntby, source).and_then(|added| {
                        if added {
                            stats.index_added += 1;
                        }
                        conn.execute(
                            "INSERT OR IGNORE INTO temp.snapshot_mntby (key, value, mntby)
                             VALUES (?1, ?2, ?3)",
                            [key, value, mntby],
                        )
                        .map(|_| ())
                        .map_err(|e| anyhow!("Failed to record snapshot of {}: {}", value, e))
                    })
                }
            };
            if let Err(e) = result {
                warn!("skipping RPSL write: {}", e);
            }
        }
    }

    /// Delete rows of this file and the observed types that it no longer contains
    fn sweep(&self, conn: &Connection, stats: &mut SyncStats) -> Result<()> {
        let source = self.source.as_str();
        for key in &self.observed {
            let n = conn
                .execute(
                    "DELETE FROM rpsl WHERE source = ?1 AND key = ?2 AND NOT EXISTS (
                        SELECT 1 FROM temp.snapshot_rpsl s
                        WHERE s.key = rpsl.key AND s.value = rpsl.value)",
                    [source, key.as_str()],
                )
                .map_err(|e| anyhow!("Failed to sweep {} objects: {}", key, e))?;
            if n > 0 {
                info!("swept {} stale {} objects", n, key);
            }
            stats.deleted += n as u64;
        }

        let family_filter = match (
            self.observed.contains("route"),
            self.observed.contains("route6"),
        ) {
            (true, true) => Some(""),
            (true, false) => Some("AND instr(route, ':') = 0"),
            (false, true) => Some("AND instr(route, ':') > 0"),
            (false, false) => None,
        };
        if let Some(filter) = family_filter {
            let n = conn
                .execute(
                    &format!(
                        "DELETE FROM rpsl_origin WHERE source = ?1 AND NOT EXISTS (
                            SELECT 1 FROM temp.snapshot_origin s
                            WHERE s.origin = rpsl_origin.origin AND s.route = rpsl_origin.route)
                         {filter}"
                    ),
                    [source],
                )
                .map_err(|e| anyhow!("Failed to sweep origin index: {}", e))?;
            stats.index_removed += n as u64;
        }

        for key in self
            .observed
            .iter()
            .filter(|k| MNTBY_OWNER_TYPES.contains(&k.as_str()))
        {
            let n = conn
                .execute(
                    "DELETE FROM rpsl_mntby WHERE source = ?1 AND key = ?2 AND NOT EXISTS (
                        SELECT 1 FROM temp.snapshot_mntby s
                        WHERE s.key = rpsl_mntby.key AND s.value = rpsl_mntby.value
                          AND s.mntby = rpsl_mntby.mntby)",
                    [source, key.as_str()],
                )
                .map_err(|e| anyhow!("Failed to sweep mnt-by index of {}: {}", key, e))?;
            stats.index_removed += n as u64;
        }

        Ok(())
    }
}

impl FeedIngestor for RpslIngestor {
    fn kind(&self) -> FeedKind {
        FeedKind::Rpsl
    }

    fn sync_file(
        &mut self,
        conn: &Connection,
        source: &str,
        reader: &mut dyn BufRead,
    ) -> Result<SyncStats> {
        conn.execute_batch(SNAPSHOT_TABLES)
            .map_err(|e| anyhow!("Failed to prepare RPSL snapshots: {}", e))?;
        self.pending.clear();
        self.observed.clear();
        self.source = source.to_string();

        let mut parser = RpslBlockParser::new();
        let mut stats = SyncStats::default();
        let lines = for_each_line(reader, |line| {
            match parser.feed(line) {
                Some(block) => self.save(conn, block, &mut stats),
                None => Ok(()),
            }
        })?;
        stats.lines = lines;
        if let Some(block) = parser.finish() {
            self.save(conn, block, &mut stats)?;
        }
        self.flush(conn, &mut stats);

        let mut swept = SyncStats::default();
        match with_savepoint(conn, "rpsl_sweep", || self.sweep(conn, &mut swept)) {
            Ok(()) => {
                stats.deleted += swept.deleted;
                stats.index_removed += swept.index_removed;
            }
            Err(e) => error!("RPSL sweep failed, nothing removed: {}", e),
        }

        Ok(stats)
    }

    fn discard_file(&mut self) {
        self.pending.clear();
        self.observed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::WhoisDatabase;
    use crate::ingest::testing::{sync_source_text, sync_text};

    const DUMP: &str = "\
% RIPE database dump
# generated for tests

aut-num:        AS64496
as-name:        FOO-AS
org:            ORG-FOO1-RIPE
mnt-by:         MAINT-FOO, MAINT-BAR
source:         RIPE

as-set:         AS-FOO
members:        AS64496
mnt-by:         MAINT-FOO

person:         John Doe
nic-hdl:        JD1-RIPE

route:          192.0.2.0/24
origin:         AS64496
mnt-by:         MAINT-FOO

route6:         2001:db8::/32
origin:         AS64496
";

    fn parse_all(text: &str) -> Vec<RpslBlock> {
        let mut parser = RpslBlockParser::new();
        let mut blocks: Vec<RpslBlock> = text.lines().filter_map(|l| parser.feed(l)).collect();
        blocks.extend(parser.finish());
        blocks
    }

    #[test]
    fn test_content_digest() {
        assert_eq!(
            content_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(content_digest("a\n"), content_digest("b\n"));
    }

    #[test]
    fn test_parser_splits_blocks() {
        let blocks = parse_all(DUMP);
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0].key, "aut-num");
        assert_eq!(blocks[0].value, "AS64496");
        assert!(blocks[0].text.starts_with("aut-num:        AS64496\nas-name:"));
        assert!(blocks[0].text.ends_with("source:         RIPE\n"));
        // last block has no trailing blank line
        assert_eq!(blocks[4].key, "route6");
    }

    #[test]
    fn test_parser_suppresses_duplicates_and_valueless_blocks() {
        let blocks = parse_all(
            "\
mntner:   MAINT-FOO
descr:    first

mntner:   maint-foo
descr:    second

mntner:
descr:    no value

  role:   Foo Role
  nic-hdl: FR1-RIPE
",
        );
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].text.contains("first"));
        assert_eq!(blocks[1].key, "role");
        assert_eq!(blocks[1].value, "Foo Role");
        assert_eq!(blocks[1].text, "role:   Foo Role\nnic-hdl: FR1-RIPE\n");
    }

    #[test]
    fn test_attribute_values() {
        let block = RpslBlock {
            key: "route".to_string(),
            value: "192.0.2.0/24".to_string(),
            text: "route: 192.0.2.0/24\norigin: AS1 # primary\nORIGIN: AS2\ndescr: x\n"
                .to_string(),
        };
        assert_eq!(block.attribute_values("origin"), vec!["AS1", "AS2"]);
        assert!(block.attribute_values("mnt-by").is_empty());
    }

    #[test]
    fn test_initial_load_and_indices() {
        let db = WhoisDatabase::open_in_memory().unwrap();
        let mut ingestor = RpslIngestor::new();
        let stats = sync_text(&db, &mut ingestor, DUMP);

        assert_eq!(stats.inserted, 4);
        // person is not a persisted type
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.index_added, 5);

        let repo = db.rpsl();
        assert!(repo.get_block("person", "John Doe").unwrap().is_none());
        assert_eq!(repo.origins_for_route("192.0.2.0/24").unwrap(), vec!["AS64496"]);
        assert_eq!(
            repo.routes_for_origin("as64496").unwrap(),
            vec!["192.0.2.0/24", "2001:db8::/32"]
        );
        let owners = repo.owners_for_mntby("MAINT-FOO", &MNTBY_OWNER_TYPES).unwrap();
        assert_eq!(owners.len(), 2);
        assert_eq!(repo.owners_for_mntby("maint-bar", &["aut-num"]).unwrap().len(), 1);
    }

    #[test]
    fn test_identical_rerun_writes_nothing() {
        let db = WhoisDatabase::open_in_memory().unwrap();
        let mut ingestor = RpslIngestor::new();
        sync_text(&db, &mut ingestor, DUMP);

        let stats = sync_text(&db, &mut ingestor, DUMP);
        assert_eq!(stats.writes(), 0);
        assert_eq!(stats.unchanged, 4);
    }

    #[test]
    fn test_changed_block_is_updated() {
        let db = WhoisDatabase::open_in_memory().unwrap();
        let mut ingestor = RpslIngestor::new();
        sync_text(&db, &mut ingestor, DUMP);

        let changed = DUMP.replace("as-name:        FOO-AS", "as-name:        FOO-NEW");
        let stats = sync_text(&db, &mut ingestor, &changed);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.inserted, 0);
        let block = db.rpsl().get_block("aut-num", "AS64496").unwrap().unwrap();
        assert!(block.contains("FOO-NEW"));
    }

    #[test]
    fn test_sweep_is_scoped_to_observed_types() {
        let db = WhoisDatabase::open_in_memory().unwrap();
        let mut ingestor = RpslIngestor::new();
        sync_text(&db, &mut ingestor, DUMP);

        // A route-only file: the old route goes, everything else stays
        let stats = sync_text(
            &db,
            &mut ingestor,
            "route:          198.51.100.0/24\norigin:         AS64497\n",
        );
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.index_added, 1);
        assert_eq!(stats.index_removed, 1);

        let repo = db.rpsl();
        assert!(repo.get_block("route", "192.0.2.0/24").unwrap().is_none());
        assert!(repo.get_block("aut-num", "AS64496").unwrap().is_some());
        assert!(repo.get_block("route6", "2001:db8::/32").unwrap().is_some());
        // route6 origins survive a sweep of IPv4 routes
        assert_eq!(repo.routes_for_origin("AS64496").unwrap(), vec!["2001:db8::/32"]);
        assert_eq!(repo.owners_for_mntby("MAINT-FOO", &MNTBY_OWNER_TYPES).unwrap().len(), 2);
    }

    #[test]
    fn test_sweep_keeps_rows_of_other_dumps_with_same_types() {
        let ripe = "aut-num: AS64496\nas-name: FOO-AS\nmnt-by: MAINT-FOO\n\n\
                    route: 192.0.2.0/24\norigin: AS64496\n";
        let apnic = "aut-num: AS4608\nas-name: APNIC-SERVICES\nmnt-by: MAINT-AP\n\n\
                     route: 203.0.113.0/24\norigin: AS4608\n";
        let db = WhoisDatabase::open_in_memory().unwrap();
        let mut ingestor = RpslIngestor::new();

        for _ in 0..2 {
            sync_source_text(&db, &mut ingestor, "mem://ripe.db", ripe);
            let stats = sync_source_text(&db, &mut ingestor, "mem://apnic.db", apnic);
            assert_eq!(stats.deleted, 0);
            assert_eq!(stats.index_removed, 0);
        }

        let repo = db.rpsl();
        assert!(repo.get_block("aut-num", "AS64496").unwrap().is_some());
        assert!(repo.get_block("aut-num", "AS4608").unwrap().is_some());
        assert_eq!(repo.origins_for_route("192.0.2.0/24").unwrap(), vec!["AS64496"]);
        assert_eq!(repo.origins_for_route("203.0.113.0/24").unwrap(), vec!["AS4608"]);
        assert_eq!(repo.owners_for_mntby("MAINT-FOO", &MNTBY_OWNER_TYPES).unwrap().len(), 1);

        // An object dropped by its own dump still goes
        let stats = sync_source_text(
            &db,
            &mut ingestor,
            "mem://ripe.db",
            "aut-num: AS64496\nas-name: FOO-AS\nmnt-by: MAINT-FOO\n\n\
             route: 198.51.100.0/24\norigin: AS64496\n",
        );
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.index_removed, 1);
        assert!(repo.get_block("route", "192.0.2.0/24").unwrap().is_none());
        assert!(repo.get_block("route", "203.0.113.0/24").unwrap().is_some());
    }

    #[test]
    fn test_object_listed_by_two_dumps_follows_last_writer() {
        let block = "mntner: MAINT-SHARED\nsource: TEST\n";
        let db = WhoisDatabase::open_in_memory().unwrap();
        let mut ingestor = RpslIngestor::new();

        sync_source_text(&db, &mut ingestor, "mem://a", block);
        let stats = sync_source_text(&db, &mut ingestor, "mem://b", block);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.writes(), 0);
        let (_, owner) = db
            .rpsl()
            .get_owned_block("mntner", "MAINT-SHARED")
            .unwrap()
            .unwrap();
        assert_eq!(owner, "mem://b");

        // The previous owner dropping it does not remove it
        let stats = sync_source_text(&db, &mut ingestor, "mem://a", "mntner: MAINT-OTHER\n");
        assert_eq!(stats.deleted, 0);
        assert!(db.rpsl().get_block("mntner", "MAINT-SHARED").unwrap().is_some());
    }

    #[test]
    fn test_mntby_index_follows_block_changes() {
        let db = WhoisDatabase::open_in_memory().unwrap();
        let mut ingestor = RpslIngestor::new();
        sync_text(&db, &mut ingestor, DUMP);

        let changed = DUMP.replace("mnt-by:         MAINT-FOO, MAINT-BAR", "mnt-by:         MAINT-BAR");
        let stats = sync_text(&db, &mut ingestor, &changed);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.index_removed, 1);

        let owners = db
            .rpsl()
            .owners_for_mntby("MAINT-FOO", &MNTBY_OWNER_TYPES)
            .unwrap();
        assert_eq!(
            owners,
            vec![crate::database::MntByOwner {
                key: "as-set".to_string(),
                value: "AS-FOO".to_string(),
            }]
        );
    }

    #[test]
    fn test_batches_are_flushed() {
        let db = WhoisDatabase::open_in_memory().unwrap();
        let mut ingestor = RpslIngestor::new();
        let mut dump = String::new();
        for i in 0..(BATCH_SIZE + 10) {
            dump.push_str(&format!("mntner: MAINT-{}\nsource: TEST\n\n", i));
        }
        let stats = sync_text(&db, &mut ingestor, &dump);
        assert_eq!(stats.inserted as usize, BATCH_SIZE + 10);
        assert_eq!(db.rpsl().counts().unwrap().objects as usize, BATCH_SIZE + 10);
    }
}
