//! RIR delegated-extended ingestor
//!
//! Line format:
//!
//! ```text
//! coordinator|country|type|value|count|date|status|identifier
//! ripencc|UA|ipv4|212.90.160.0|8192|20010912|allocated|8ed3f35a-...
//! ```
//!
//! Only `allocated` records with a concrete country are stored. Every
//! network seen in a file is recorded in a per-file snapshot; at the end of
//! the file, networks of the coordinators that file touched but that are
//! missing from the snapshot are deleted. Other coordinators are left
//! alone, so each RIR's file only ever sweeps its own rows.

use super::{for_each_line, with_savepoint, FeedIngestor, FeedKind, SyncStats};
use crate::address::{ipv4_to_cidr, ipv6_to_cidr, network_bounds, validate_asn};
use crate::database::{AddressFamily, AllocationRepository, NetworkRecord};
use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::io::BufRead;
use tracing::{debug, error, info, warn};

/// Placeholder holder of ASNs only known from the AS-name list
pub(crate) const ASNAMES_COORDINATOR: &str = "asnames";

/// Upper bound on ASN block expansion for a single line
const MAX_ASN_BLOCK: u32 = 65_536;

const SNAPSHOT_TABLES: &str = r#"
    CREATE TEMP TABLE IF NOT EXISTS snapshot_ipv4 (
        coordinator TEXT NOT NULL,
        identifier TEXT NOT NULL,
        network TEXT NOT NULL,
        UNIQUE (coordinator, network, identifier)
    );
    CREATE TEMP TABLE IF NOT EXISTS snapshot_ipv6 (
        coordinator TEXT NOT NULL,
        identifier TEXT NOT NULL,
        network TEXT NOT NULL,
        UNIQUE (coordinator, network, identifier)
    );
    DELETE FROM temp.snapshot_ipv4;
    DELETE FROM temp.snapshot_ipv6;
"#;

/// One parsed `allocated` record
struct Delegation<'l> {
    coordinator: &'l str,
    country: &'l str,
    kind: &'l str,
    value: &'l str,
    count: &'l str,
    date: &'l str,
    identifier: &'l str,
}

impl<'l> Delegation<'l> {
    /// `None` for comments, headers, summaries and non-allocated records
    fn parse(line: &'l str) -> Option<Self> {
        if line.starts_with('#') {
            return None;
        }
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() < 8 || fields[6] != "allocated" || fields[1] == "*" {
            return None;
        }
        Some(Delegation {
            coordinator: fields[0],
            country: fields[1],
            kind: fields[2],
            value: fields[3],
            count: fields[4],
            date: fields[5],
            identifier: fields[7],
        })
    }
}

/// Ingestor for delegated-extended files
#[derive(Default)]
pub struct DelegationIngestor {
    touched: BTreeSet<String>,
}

impl DelegationIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&mut self, conn: &Connection, record: &Delegation, stats: &mut SyncStats) -> Result<()> {
        match record.kind {
            "asn" => self.apply_asn(conn, record, stats),
            "ipv4" => {
                let count: i64 = record
                    .count
                    .parse()
                    .map_err(|_| anyhow!("bad host count '{}'", record.count))?;
                let cidr = ipv4_to_cidr(record.value, count)?;
                self.apply_network(conn, record, AddressFamily::V4, cidr, stats)
            }
            "ipv6" => {
                let prefix: i64 = record
                    .count
                    .parse()
                    .map_err(|_| anyhow!("bad prefix length '{}'", record.count))?;
                let cidr = ipv6_to_cidr(record.value, prefix)?;
                self.apply_network(conn, record, AddressFamily::V6, cidr, stats)
            }
            other => {
                debug!("ignoring record type {}", other);
                stats.skipped += 1;
                Ok(())
            }
        }
    }

    fn apply_asn(&mut self, conn: &Connection, record: &Delegation, stats: &mut SyncStats) -> Result<()> {
        let first = validate_asn(record.value)?;
        let count: u32 = record
            .count
            .parse()
            .map_err(|_| anyhow!("bad ASN count '{}'", record.count))?;
        if count == 0 || count > MAX_ASN_BLOCK {
            return Err(anyhow!("ASN block of {} at AS{}", count, first));
        }
        let last = first
            .checked_add(count - 1)
            .ok_or_else(|| anyhow!("ASN block overflows at AS{}", first))?;

        let repo = AllocationRepository::new(conn);
        for asn in first..=last {
            match repo.find_asn(asn)? {
                None => {
                    repo.insert_asn(
                        asn,
                        record.coordinator,
                        record.country,
                        record.date,
                        record.identifier,
                        None,
                    )?;
                    stats.inserted += 1;
                }
                Some(existing)
                    if existing.coordinator != record.coordinator
                        || existing.identifier != record.identifier =>
                {
                    let removed = repo
                        .delete_networks_by_owner(&existing.coordinator, &existing.identifier)?;
                    repo.reassign_asn(
                        asn,
                        record.coordinator,
                        record.country,
                        record.date,
                        record.identifier,
                    )?;
                    // A name learned before any RIR listed the ASN stays valid
                    if existing.coordinator == ASNAMES_COORDINATOR {
                        if let Some(name) = &existing.name {
                            repo.update_asn_name(asn, name, record.country)?;
                        }
                    } else {
                        info!(
                            "AS{} moved from {}/{} to {}/{}, dropped {} networks",
                            asn,
                            existing.coordinator,
                            existing.identifier,
                            record.coordinator,
                            record.identifier,
                            removed
                        );
                    }
                    stats.updated += 1;
                    stats.deleted += removed as u64;
                }
                Some(_) => stats.unchanged += 1,
            }
        }
        Ok(())
    }

    fn apply_network(
        &mut self,
        conn: &Connection,
        record: &Delegation,
        family: AddressFamily,
        cidr: String,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let (firstip, lastip) = network_bounds(&cidr)?;
        let network = NetworkRecord {
            family,
            coordinator: record.coordinator.to_string(),
            country: record.country.to_string(),
            network: cidr,
            firstip,
            lastip,
            date: record.date.to_string(),
            identifier: record.identifier.to_string(),
        };

        if AllocationRepository::new(conn).insert_network(&network)? {
            stats.inserted += 1;
        } else {
            stats.unchanged += 1;
        }

        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO temp.snapshot_{} (coordinator, identifier, network)
                 VALUES (?1, ?2, ?3)",
                family.table()
            ),
            [record.coordinator, record.identifier, network.network.as_str()],
        )
        .map_err(|e| anyhow!("Failed to record snapshot of {}: {}", network.network, e))?;

        if !self.touched.contains(record.coordinator) {
            self.touched.insert(record.coordinator.to_string());
        }
        Ok(())
    }

    /// Delete networks of touched coordinators that this file no longer lists
    fn sweep(&self, conn: &Connection) -> Result<u64> {
        let mut removed = 0u64;
        for coordinator in &self.touched {
            for family in [AddressFamily::V4, AddressFamily::V6] {
                let table = family.table();
                let n = conn
                    .execute(
                        &format!(
                            "DELETE FROM {table} WHERE coordinator = ?1 AND NOT EXISTS (
                                SELECT 1 FROM temp.snapshot_{table} s
                                WHERE s.coordinator = {table}.coordinator
                                  AND s.identifier = {table}.identifier
                                  AND s.network = {table}.network)"
                        ),
                        [coordinator],
                    )
                    .map_err(|e| anyhow!("Failed to sweep {} of {}: {}", table, coordinator, e))?;
                if n > 0 {
                    info!("swept {} stale {} networks of {}", n, table, coordinator);
                }
                removed += n as u64;
            }
        }
        Ok(removed)
    }
}

impl FeedIngestor for DelegationIngestor {
    fn kind(&self) -> FeedKind {
        FeedKind::Extended
    }

    fn sync_file(
        &mut self,
        conn: &Connection,
        _source: &str,
        reader: &mut dyn BufRead,
    ) -> Result<SyncStats> {
        conn.execute_batch(SNAPSHOT_TABLES)
            .map_err(|e| anyhow!("Failed to prepare delegation snapshots: {}", e))?;
        self.touched.clear();

        let mut stats = SyncStats::default();
        let lines = for_each_line(reader, |line| {
            let Some(record) = Delegation::parse(line) else {
                stats.skipped += 1;
                return Ok(());
            };
            if let Err(e) = self.apply(conn, &record, &mut stats) {
                warn!("skipping delegation line '{}': {}", line, e);
                stats.skipped += 1;
            }
            Ok(())
        })?;
        stats.lines = lines;

        match with_savepoint(conn, "delegation_sweep", || self.sweep(conn)) {
            Ok(removed) => stats.deleted += removed,
            Err(e) => error!("delegation sweep failed, nothing removed: {}", e),
        }

        Ok(stats)
    }

    fn discard_file(&mut self) {
        self.touched.clear();
    }
}
