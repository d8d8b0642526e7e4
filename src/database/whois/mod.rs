//! Whois mirror storage
//!
//! The persistent SQLite database holding:
//! - delegation records (ASN, IPv4, IPv6 allocations)
//! - RPSL objects with their origin and mnt-by indices
//! - per-address geolocation labels
//! - sync state of every upstream source file

mod allocation;
mod file_meta;
mod geo;
mod rpsl;

pub use allocation::{AddressFamily, AllocationRepository, AsnRecord, NetworkRecord};
pub use file_meta::{FileMeta, FileMetaRepository};
pub use geo::GeoRepository;
pub use rpsl::{MntByOwner, RpslCounts, RpslObject, RpslRepository};

use crate::database::core::{DatabaseConn, SchemaManager, SchemaStatus};
use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

/// Row counts across the whole store
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreCounts {
    pub asn: u64,
    pub ipv4: u64,
    pub ipv6: u64,
    pub rpsl: RpslCounts,
    pub geo: u64,
    pub sources: u64,
}

/// Main whois database
///
/// Opens the store, brings the schema up to date, and hands out
/// repositories bound to its connection.
pub struct WhoisDatabase {
    db: DatabaseConn,
}

impl WhoisDatabase {
    /// Open the whois database at the specified path
    ///
    /// A fresh file is initialized. An outdated, incompatible or damaged
    /// schema is dropped and recreated; the next sync repopulates it.
    pub fn open(path: &str) -> Result<Self> {
        let db = DatabaseConn::open_path(path)?;
        let schema = SchemaManager::new(&db.conn);

        match schema.check_status()? {
            SchemaStatus::Current => {
                info!("whois database schema is current");
            }
            SchemaStatus::NotInitialized => {
                info!("initializing whois database schema");
                schema.initialize()?;
            }
            SchemaStatus::NeedsMigration { from, to } => {
                warn!("whois database needs migration from v{} to v{}, resetting", from, to);
                schema.reset()?;
                schema.initialize()?;
            }
            SchemaStatus::Incompatible {
                database_version,
                required_version,
            } => {
                warn!(
                    "whois database schema incompatible (db: v{}, required: v{}), resetting",
                    database_version, required_version
                );
                schema.reset()?;
                schema.initialize()?;
            }
            SchemaStatus::Corrupted => {
                warn!("whois database schema corrupted, resetting");
                schema.reset()?;
                schema.initialize()?;
            }
        }

        Ok(Self { db })
    }

    /// Open the database from a data directory: `{data_dir}/whoislite.sqlite3`
    pub fn open_in_dir(data_dir: &str) -> Result<Self> {
        let path = format!("{}/whoislite.sqlite3", data_dir.trim_end_matches('/'));
        Self::open(&path)
    }

    /// Create an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let db = DatabaseConn::open_in_memory()?;
        SchemaManager::new(&db.conn).initialize()?;
        Ok(Self { db })
    }

    pub fn allocations(&self) -> AllocationRepository<'_> {
        AllocationRepository::new(&self.db.conn)
    }

    pub fn rpsl(&self) -> RpslRepository<'_> {
        RpslRepository::new(&self.db.conn)
    }

    pub fn geo(&self) -> GeoRepository<'_> {
        GeoRepository::new(&self.db.conn)
    }

    pub fn file_meta(&self) -> FileMetaRepository<'_> {
        FileMetaRepository::new(&self.db.conn)
    }

    /// Get the underlying connection wrapper
    pub fn conn(&self) -> &DatabaseConn {
        &self.db
    }

    /// Get the underlying database connection (for advanced queries)
    pub fn connection(&self) -> &rusqlite::Connection {
        &self.db.conn
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        let (asn, ipv4, ipv6) = self.allocations().counts()?;
        Ok(StoreCounts {
            asn,
            ipv4,
            ipv6,
            rpsl: self.rpsl().counts()?,
            geo: self.geo().count()?,
            sources: self.db.table_count("file_metadata")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = WhoisDatabase::open_in_memory().unwrap();
        let counts = db.counts().unwrap();
        assert_eq!(counts.asn, 0);
        assert_eq!(counts.rpsl.objects, 0);
    }

    #[test]
    fn test_open_in_dir_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        {
            let db = WhoisDatabase::open_in_dir(data_dir).unwrap();
            db.file_meta().record("mem://ripe", "r1", 42).unwrap();
        }
        let db = WhoisDatabase::open_in_dir(data_dir).unwrap();
        let meta = db.file_meta().get("mem://ripe").unwrap().unwrap();
        assert!(meta.matches("r1", 42));
        assert_eq!(db.counts().unwrap().sources, 1);
    }
}
