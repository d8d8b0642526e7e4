//! AS-name list ingestor
//!
//! Reads the `asn.txt` format, one ASN per line:
//!
//! ```text
//! 13335 CLOUDFLARENET, US
//! 64496 EXAMPLE-AS Example Networks Ltd, UA
//! ```
//!
//! ASNs not yet known from any delegation file are inserted under the
//! `asnames` placeholder coordinator; a later delegation record adopts them.

use super::delegation::ASNAMES_COORDINATOR;
use super::{for_each_line, FeedIngestor, FeedKind, SyncStats};
use crate::address::validate_asn;
use crate::database::AllocationRepository;
use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use std::io::BufRead;
use tracing::{debug, warn};

/// One parsed AS-name line
#[derive(Debug, PartialEq, Eq)]
struct AsName<'l> {
    asn: u32,
    name: &'l str,
    country: &'l str,
}

/// Outcome of parsing a line
#[derive(Debug, PartialEq, Eq)]
enum Parsed<'l> {
    Entry(AsName<'l>),
    /// Nothing to do, not worth a warning
    Ignore,
    Invalid(&'static str),
}

fn parse_line(line: &str) -> Parsed<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Parsed::Ignore;
    }

    let Some((asn_text, rest)) = line.split_once(char::is_whitespace) else {
        return Parsed::Invalid("missing name");
    };
    if asn_text == "0" {
        return Parsed::Ignore;
    }
    let Ok(asn) = validate_asn(asn_text) else {
        return Parsed::Invalid("invalid ASN");
    };

    let Some((name, country)) = rest.trim_start().rsplit_once(',') else {
        return Parsed::Invalid("missing country");
    };
    let country = country.trim();
    if country.len() != 2 {
        return Parsed::Invalid("country code is not two letters");
    }
    if country == "ZZ" {
        return Parsed::Ignore;
    }

    Parsed::Entry(AsName {
        asn,
        name: name.trim(),
        country,
    })
}

/// Ingestor for the AS-name list
#[derive(Default)]
pub struct AsNamesIngestor;

impl AsNamesIngestor {
    pub fn new() -> Self {
        Self
    }

    fn apply(&self, repo: &AllocationRepository, entry: &AsName, today: &str, stats: &mut SyncStats) -> Result<()> {
        match repo.find_asn(entry.asn)? {
            Some(existing) => {
                let same_name = existing
                    .name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(entry.name));
                if same_name && existing.country == entry.country {
                    stats.unchanged += 1;
                } else {
                    repo.update_asn_name(entry.asn, entry.name, entry.country)?;
                    stats.updated += 1;
                }
            }
            None => {
                repo.insert_asn(
                    entry.asn,
                    ASNAMES_COORDINATOR,
                    entry.country,
                    today,
                    &format!("asnames-{}", entry.asn),
                    Some(entry.name),
                )?;
                stats.inserted += 1;
            }
        }
        Ok(())
    }
}

impl FeedIngestor for AsNamesIngestor {
    fn kind(&self) -> FeedKind {
        FeedKind::Asnames
    }

    fn sync_file(
        &mut self,
        conn: &Connection,
        _source: &str,
        reader: &mut dyn BufRead,
    ) -> Result<SyncStats> {
        let repo = AllocationRepository::new(conn);
        let today = Utc::now().format("%Y%m%d").to_string();

        let mut stats = SyncStats::default();
        let lines = for_each_line(reader, |line| {
            match parse_line(line) {
                Parsed::Entry(entry) => {
                    if let Err(e) = self.apply(&repo, &entry, &today, &mut stats) {
                        warn!("failed to store name of AS{}: {}", entry.asn, e);
                        stats.skipped += 1;
                    }
                }
                Parsed::Ignore => stats.skipped += 1,
                Parsed::Invalid(reason) => {
                    warn!("skipping AS-name line '{}': {}", line, reason);
                    stats.skipped += 1;
                }
            }
            Ok(())
        })?;
        stats.lines = lines;

        debug!("AS names: {}", stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::WhoisDatabase;
    use crate::ingest::testing::sync_text;

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("64496 EXAMPLE-AS Example, Networks Ltd, UA"),
            Parsed::Entry(AsName {
                asn: 64496,
                name: "EXAMPLE-AS Example, Networks Ltd",
                country: "UA",
            })
        );
        assert_eq!(parse_line(""), Parsed::Ignore);
        assert_eq!(parse_line("0 -Reserved AS-, ZZ"), Parsed::Ignore);
        assert_eq!(parse_line("23456 -Reserved AS-, ZZ"), Parsed::Ignore);
        assert!(matches!(parse_line("x12 FOO, US"), Parsed::Invalid(_)));
        assert!(matches!(parse_line("12 FOO"), Parsed::Invalid(_)));
        assert!(matches!(parse_line("12 FOO, USA"), Parsed::Invalid(_)));
        assert!(matches!(parse_line("12"), Parsed::Invalid(_)));
    }

    #[test]
    fn test_insert_and_update_names() {
        let db = WhoisDatabase::open_in_memory().unwrap();
        db.allocations()
            .insert_asn(64496, "ripencc", "UA", "20100101", "org-a", None)
            .unwrap();

        let mut ingestor = AsNamesIngestor::new();
        let stats = sync_text(
            &db,
            &mut ingestor,
            "64496 FOO-AS Foo Ltd, UA\n64497 BAR-AS Bar, NL\n",
        );
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.inserted, 1);

        let known = db.allocations().find_asn(64496).unwrap().unwrap();
        assert_eq!(known.name.as_deref(), Some("FOO-AS Foo Ltd"));
        assert_eq!(known.coordinator, "ripencc");

        let placeholder = db.allocations().find_asn(64497).unwrap().unwrap();
        assert_eq!(placeholder.coordinator, "asnames");
        assert_eq!(placeholder.identifier, "asnames-64497");
        assert_eq!(placeholder.date.len(), 8);
    }

    #[test]
    fn test_case_only_change_is_not_a_write() {
        let db = WhoisDatabase::open_in_memory().unwrap();
        let mut ingestor = AsNamesIngestor::new();
        sync_text(&db, &mut ingestor, "64496 FOO-AS Foo Ltd, UA\n");

        let stats = sync_text(&db, &mut ingestor, "64496 foo-as foo ltd, UA\n");
        assert_eq!(stats.writes(), 0);

        let stats = sync_text(&db, &mut ingestor, "64496 foo-as foo ltd, PL\n");
        assert_eq!(stats.updated, 1);
        let rec = db.allocations().find_asn(64496).unwrap().unwrap();
        assert_eq!(rec.country, "PL");
    }
}
