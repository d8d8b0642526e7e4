//! Allocation repository
//!
//! ASN, IPv4 and IPv6 delegation records. Networks carry their range as
//! fixed-width decimal bounds (see [`crate::address`]) so containment
//! checks are plain string comparisons.

use crate::address::{ip_to_range_bound, parse_address, range_width, RANGE_BOUND_WIDTH};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::net::IpAddr;

/// Address family of a network allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Table holding allocations of this family
    pub fn table(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "ipv4",
            AddressFamily::V6 => "ipv6",
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// One ASN allocation row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsnRecord {
    pub asn: u32,
    pub coordinator: String,
    pub country: String,
    pub date: String,
    pub identifier: String,
    pub name: Option<String>,
    pub geo: String,
}

/// One IPv4 or IPv6 allocation row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRecord {
    pub family: AddressFamily,
    pub coordinator: String,
    pub country: String,
    pub network: String,
    pub firstip: String,
    pub lastip: String,
    pub date: String,
    pub identifier: String,
}

/// Repository for delegation records
pub struct AllocationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> AllocationRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_asn(row: &rusqlite::Row) -> rusqlite::Result<AsnRecord> {
        Ok(AsnRecord {
            asn: row.get(0)?,
            coordinator: row.get(1)?,
            country: row.get(2)?,
            date: row.get(3)?,
            identifier: row.get(4)?,
            name: row.get(5)?,
            geo: row.get(6)?,
        })
    }

    /// Look up the allocation row of an ASN
    pub fn find_asn(&self, asn: u32) -> Result<Option<AsnRecord>> {
        self.conn
            .query_row(
                "SELECT asn, coordinator, country, date, identifier, name, geo
                 FROM asn WHERE asn = ?1",
                [asn],
                Self::row_to_asn,
            )
            .optional()
            .map_err(|e| anyhow!("Failed to look up AS{}: {}", asn, e))
    }

    /// All ASNs owned by an allocation holder
    pub fn asns_by_owner(&self, coordinator: &str, identifier: &str) -> Result<Vec<AsnRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT asn, coordinator, country, date, identifier, name, geo
             FROM asn WHERE coordinator = ?1 AND identifier = ?2 ORDER BY asn",
        )?;
        let rows = stmt.query_map([coordinator, identifier], Self::row_to_asn)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| anyhow!("Failed to list ASNs of {}/{}: {}", coordinator, identifier, e))
    }

    /// Insert a new ASN row
    pub fn insert_asn(
        &self,
        asn: u32,
        coordinator: &str,
        country: &str,
        date: &str,
        identifier: &str,
        name: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO asn (coordinator, country, asn, date, identifier, name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![coordinator, country, asn, date, identifier, name],
            )
            .map_err(|e| anyhow!("Failed to insert AS{}: {}", asn, e))?;
        Ok(())
    }

    /// Move an ASN to a new holder, clearing its name and geo labels
    pub fn reassign_asn(
        &self,
        asn: u32,
        coordinator: &str,
        country: &str,
        date: &str,
        identifier: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE asn SET coordinator = ?1, country = ?2, date = ?3, identifier = ?4,
                        name = NULL, geo = ''
                 WHERE asn = ?5",
                params![coordinator, country, date, identifier, asn],
            )
            .map_err(|e| anyhow!("Failed to reassign AS{}: {}", asn, e))?;
        Ok(())
    }

    /// Set the registered name and country of an ASN
    pub fn update_asn_name(&self, asn: u32, name: &str, country: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE asn SET name = ?1, country = ?2 WHERE asn = ?3",
                params![name, country, asn],
            )
            .map_err(|e| anyhow!("Failed to update name of AS{}: {}", asn, e))?;
        Ok(())
    }

    /// Delete every IPv4/IPv6 network of a holder, returning the number removed
    pub fn delete_networks_by_owner(&self, coordinator: &str, identifier: &str) -> Result<usize> {
        let mut removed = 0;
        for family in [AddressFamily::V4, AddressFamily::V6] {
            removed += self
                .conn
                .execute(
                    &format!(
                        "DELETE FROM {} WHERE coordinator = ?1 AND identifier = ?2",
                        family.table()
                    ),
                    [coordinator, identifier],
                )
                .map_err(|e| {
                    anyhow!(
                        "Failed to delete {} networks of {}/{}: {}",
                        family.table(),
                        coordinator,
                        identifier,
                        e
                    )
                })?;
        }
        Ok(removed)
    }

    /// Insert a network if absent; returns true when a row was added
    pub fn insert_network(&self, record: &NetworkRecord) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {}
                     (coordinator, country, network, firstip, lastip, date, identifier)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    record.family.table()
                ),
                params![
                    record.coordinator,
                    record.country,
                    record.network,
                    record.firstip,
                    record.lastip,
                    record.date,
                    record.identifier
                ],
            )
            .map_err(|e| anyhow!("Failed to insert network {}: {}", record.network, e))?;
        Ok(inserted > 0)
    }

    /// Narrowest allocation of `family` containing the range bound
    ///
    /// Ties between equally wide ranges resolve to the earliest inserted row.
    pub fn narrowest_containing(
        &self,
        family: AddressFamily,
        bound: &str,
    ) -> Result<Option<NetworkRecord>> {
        if bound.len() != RANGE_BOUND_WIDTH {
            return Err(anyhow!("Malformed range bound '{}'", bound));
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT coordinator, country, network, firstip, lastip, date, identifier
             FROM {} WHERE firstip <= ?1 AND lastip >= ?1 ORDER BY id",
            family.table()
        ))?;
        let rows = stmt.query_map([bound], |row| {
            Ok(NetworkRecord {
                family,
                coordinator: row.get(0)?,
                country: row.get(1)?,
                network: row.get(2)?,
                firstip: row.get(3)?,
                lastip: row.get(4)?,
                date: row.get(5)?,
                identifier: row.get(6)?,
            })
        })?;

        let mut best: Option<(u128, NetworkRecord)> = None;
        for row in rows {
            let record = row.map_err(|e| anyhow!("Failed to read network row: {}", e))?;
            let Some(width) = range_width(&record.firstip, &record.lastip) else {
                continue;
            };
            let narrower = match &best {
                Some((best_width, _)) => width < *best_width,
                None => true,
            };
            if narrower {
                best = Some((width, record));
            }
        }

        Ok(best.map(|(_, record)| record))
    }

    /// Narrowest allocation containing an address or a CIDR's network address
    pub fn narrowest_for_address(&self, address: &str) -> Result<Option<NetworkRecord>> {
        let addr = parse_address(address).map_err(|e| anyhow!("{}", e))?;
        self.narrowest_containing(AddressFamily::of(&addr), &ip_to_range_bound(addr))
    }

    /// Clear aggregated geo labels on every ASN
    pub fn clear_asn_geo(&self) -> Result<usize> {
        self.conn
            .execute("UPDATE asn SET geo = '' WHERE geo <> ''", [])
            .map_err(|e| anyhow!("Failed to clear ASN geo labels: {}", e))
    }

    /// Replace the aggregated geo labels of every ASN owned by a holder
    pub fn set_owner_geo(&self, coordinator: &str, identifier: &str, geo: &str) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE asn SET geo = ?1 WHERE coordinator = ?2 AND identifier = ?3",
                [geo, coordinator, identifier],
            )
            .map_err(|e| anyhow!("Failed to set geo of {}/{}: {}", coordinator, identifier, e))
    }

    /// Row counts as (asn, ipv4, ipv6)
    pub fn counts(&self) -> Result<(u64, u64, u64)> {
        let count = |table: &str| -> Result<u64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })
                .map_err(|e| anyhow!("Failed to count {}: {}", table, e))
        };
        Ok((count("asn")?, count("ipv4")?, count("ipv6")?))
    }
}
