//! Geolocation enrichment
//!
//! Feed lines look like `address,_,city,region,countryName,countryCode`.
//! Each address contributes the label `city,region,countryName,countryCode`
//! to the ASNs owning the narrowest allocation that contains it, and to the
//! per-address label table. Labels accumulate as `|`-separated segments.
//!
//! Labels are rebuilt from scratch every pass: [`GeoIngestor::begin_pass`]
//! clears them, then every geo source is replayed.

use super::{for_each_line, FeedIngestor, FeedKind, SyncStats, BATCH_SIZE};
use crate::address::{ip_to_range_bound, parse_address};
use crate::database::{AddressFamily, AllocationRepository, GeoRepository};
use anyhow::Result;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use tracing::{debug, info, warn};

/// Union-append `label` to a `|`-separated label list
///
/// Returns `None` when `label` already is one of the segments.
pub fn merge_label(existing: &str, label: &str) -> Option<String> {
    if existing.is_empty() {
        return Some(label.to_string());
    }
    if existing.split('|').any(|segment| segment == label) {
        return None;
    }
    Some(format!("{}|{}", existing, label))
}

/// (coordinator, identifier) of an allocation holder
type Owner = (String, String);

/// One accepted feed line
struct GeoLine<'l> {
    address: &'l str,
    label: String,
}

fn parse_line(line: &str) -> Option<GeoLine<'_>> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 6 {
        return None;
    }
    let (city, region, country_name, country_code) = (fields[2], fields[3], fields[4], fields[5]);
    if country_code.len() != 2 {
        return None;
    }
    Some(GeoLine {
        address: fields[0],
        label: [city, region, country_name, country_code].join(","),
    })
}

/// Ingestor for geolocation feeds
///
/// Caches live for one pass; dirty entries are written back in batches.
#[derive(Default)]
pub struct GeoIngestor {
    /// narrowest containing allocation holder per range bound
    matches: HashMap<String, Option<Owner>>,
    owner_labels: HashMap<Owner, String>,
    address_labels: HashMap<String, String>,
    dirty_owners: HashSet<Owner>,
    dirty_addresses: HashSet<String>,
    queued: usize,
}

impl GeoIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear_caches(&mut self) {
        self.matches.clear();
        self.owner_labels.clear();
        self.address_labels.clear();
        self.dirty_owners.clear();
        self.dirty_addresses.clear();
        self.queued = 0;
    }

    fn owner_of(&mut self, conn: &Connection, family: AddressFamily, bound: &str) -> Result<Option<Owner>> {
        if let Some(owner) = self.matches.get(bound) {
            return Ok(owner.clone());
        }
        let owner = AllocationRepository::new(conn)
            .narrowest_containing(family, bound)?
            .map(|net| (net.coordinator, net.identifier));
        self.matches.insert(bound.to_string(), owner.clone());
        Ok(owner)
    }

    fn apply(&mut self, conn: &Connection, line: &GeoLine, stats: &mut SyncStats) -> Result<()> {
        let addr = parse_address(line.address)?;
        let bound = ip_to_range_bound(addr);

        match self.owner_of(conn, AddressFamily::of(&addr), &bound)? {
            Some(owner) => {
                let current = match self.owner_labels.get(&owner) {
                    Some(label) => label.clone(),
                    None => AllocationRepository::new(conn)
                        .asns_by_owner(&owner.0, &owner.1)?
                        .into_iter()
                        .next()
                        .map(|rec| rec.geo)
                        .unwrap_or_default(),
                };
                match merge_label(&current, &line.label) {
                    Some(merged) => {
                        self.owner_labels.insert(owner.clone(), merged);
                        self.dirty_owners.insert(owner);
                        self.queued += 1;
                        stats.updated += 1;
                    }
                    None => {
                        self.owner_labels.insert(owner, current);
                        stats.unchanged += 1;
                    }
                }
            }
            None => debug!("no allocation contains {}", line.address),
        }

        let current = match self.address_labels.get(&bound) {
            Some(label) => Some(label.clone()),
            None => GeoRepository::new(conn).get(&bound)?,
        };
        match current {
            None => {
                self.address_labels.insert(bound.clone(), line.label.clone());
                self.dirty_addresses.insert(bound);
                self.queued += 1;
                stats.inserted += 1;
            }
            Some(current) => match merge_label(&current, &line.label) {
                Some(merged) => {
                    self.address_labels.insert(bound.clone(), merged);
                    self.dirty_addresses.insert(bound);
                    self.queued += 1;
                    stats.updated += 1;
                }
                None => {
                    self.address_labels.insert(bound, current);
                    stats.unchanged += 1;
                }
            },
        }

        if self.queued >= BATCH_SIZE {
            self.flush(conn);
        }
        Ok(())
    }

    /// Write dirty labels back; a failing element is logged and skipped
    fn flush(&mut self, conn: &Connection) {
        let allocations = AllocationRepository::new(conn);
        for owner in self.dirty_owners.drain() {
            let Some(label) = self.owner_labels.get(&owner) else {
                continue;
            };
            if let Err(e) = allocations.set_owner_geo(&owner.0, &owner.1, label) {
                warn!("skipping geo label of {}/{}: {}", owner.0, owner.1, e);
            }
        }

        let geo = GeoRepository::new(conn);
        for bound in self.dirty_addresses.drain() {
            let Some(label) = self.address_labels.get(&bound) else {
                continue;
            };
            if let Err(e) = geo.upsert(&bound, label) {
                warn!("skipping geo label of {}: {}", bound, e);
            }
        }
        self.queued = 0;
    }
}

impl FeedIngestor for GeoIngestor {
    fn kind(&self) -> FeedKind {
        FeedKind::Geolocations
    }

    fn begin_pass(&mut self, conn: &Connection) -> Result<()> {
        self.clear_caches();
        let asns = AllocationRepository::new(conn).clear_asn_geo()?;
        let addresses = GeoRepository::new(conn).clear()?;
        info!(
            "cleared geo labels of {} ASNs and {} addresses",
            asns, addresses
        );
        Ok(())
    }

    fn sync_file(
        &mut self,
        conn: &Connection,
        _source: &str,
        reader: &mut dyn BufRead,
    ) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let lines = for_each_line(reader, |line| {
            if line.trim().is_empty() {
                stats.skipped += 1;
                return Ok(());
            }
            let Some(parsed) = parse_line(line) else {
                warn!("invalid geolocation line: {}", line);
                stats.skipped += 1;
                return Ok(());
            };
            if let Err(e) = self.apply(conn, &parsed, &mut stats) {
                warn!("skipping geolocation line '{}': {}", line, e);
                stats.skipped += 1;
            }
            Ok(())
        })?;
        stats.lines = lines;
        self.flush(conn);
        Ok(stats)
    }

    fn discard_file(&mut self) {
        // The rolled back file may have fed the caches
        self.clear_caches();
    }
}
