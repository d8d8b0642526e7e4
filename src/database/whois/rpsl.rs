//! RPSL object repository
//!
//! Stores whole RPSL blocks keyed by object type and primary value, plus
//! the two derived indices: route prefix to origin, and owner object to
//! maintainer. Values compare case-insensitively. Every row records the
//! source dump that wrote it.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// A stored RPSL object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpslObject {
    pub key: String,
    pub value: String,
    pub block: String,
}

/// Owner of a `mnt-by:` reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MntByOwner {
    pub key: String,
    pub value: String,
}

/// Row counts of the RPSL tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RpslCounts {
    pub objects: u64,
    pub origins: u64,
    pub mntby: u64,
}

pub struct RpslRepository<'a> {
    conn: &'a Connection,
}

impl<'a> RpslRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Stored block of a single object
    pub fn get_block(&self, key: &str, value: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT block FROM rpsl WHERE key = ?1 AND value = ?2",
                [key, value],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| anyhow!("Failed to read {} {}: {}", key, value, e))
    }

    /// Stored block of a single object together with the source owning it
    pub fn get_owned_block(&self, key: &str, value: &str) -> Result<Option<(String, String)>> {
        self.conn
            .query_row(
                "SELECT block, source FROM rpsl WHERE key = ?1 AND value = ?2",
                [key, value],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| anyhow!("Failed to read {} {}: {}", key, value, e))
    }

    /// Objects of any of `keys` with the given primary value, in key order
    pub fn find(&self, keys: &[&str], value: &str) -> Result<Vec<RpslObject>> {
        let mut objects = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, block FROM rpsl WHERE key = ?1 AND value = ?2")?;
        for key in keys {
            let rows = stmt.query_map(params![key, value], |row| {
                Ok(RpslObject {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    block: row.get(2)?,
                })
            })?;
            for row in rows {
                objects.push(row.map_err(|e| anyhow!("Failed to read RPSL row: {}", e))?);
            }
        }
        Ok(objects)
    }

    pub fn insert(&self, key: &str, value: &str, block: &str, source: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO rpsl (key, value, block, source) VALUES (?1, ?2, ?3, ?4)",
                [key, value, block, source],
            )
            .map_err(|e| anyhow!("Failed to insert {} {}: {}", key, value, e))?;
        Ok(())
    }

    /// Replace an object's block; the writing source takes ownership of it
    pub fn update(&self, key: &str, value: &str, block: &str, source: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE rpsl SET block = ?3, source = ?4 WHERE key = ?1 AND value = ?2",
                [key, value, block, source],
            )
            .map_err(|e| anyhow!("Failed to update {} {}: {}", key, value, e))?;
        Ok(())
    }

    /// Hand an unchanged object over to another source
    pub fn claim(&self, key: &str, value: &str, source: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE rpsl SET source = ?3 WHERE key = ?1 AND value = ?2",
                [key, value, source],
            )
            .map_err(|e| anyhow!("Failed to claim {} {}: {}", key, value, e))?;
        Ok(())
    }

    /// Record a route to origin pair owned by `source`
    ///
    /// Returns true if the pair was new or moved to `source`.
    pub fn add_origin(&self, origin: &str, route: &str, source: &str) -> Result<bool> {
        let added = self
            .conn
            .execute(
                "INSERT INTO rpsl_origin (origin, route, source) VALUES (?1, ?2, ?3)
                 ON CONFLICT(origin, route) DO UPDATE SET source = excluded.source
                 WHERE rpsl_origin.source <> excluded.source",
                [origin, route, source],
            )
            .map_err(|e| anyhow!("Failed to index origin {} of {}: {}", origin, route, e))?;
        Ok(added > 0)
    }

    /// Record an owner to maintainer reference owned by `source`
    ///
    /// Returns true if the reference was new or moved to `source`.
    pub fn add_mntby(&self, key: &str, value: &str, mntby: &str, source: &str) -> Result<bool> {
        let added = self
            .conn
            .execute(
                "INSERT INTO rpsl_mntby (key, value, mntby, source) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(mntby, key, value) DO UPDATE SET source = excluded.source
                 WHERE rpsl_mntby.source <> excluded.source",
                [key, value, mntby, source],
            )
            .map_err(|e| anyhow!("Failed to index mnt-by {} of {}: {}", mntby, value, e))?;
        Ok(added > 0)
    }

    /// Origins announced for a route prefix
    pub fn origins_for_route(&self, route: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT origin FROM rpsl_origin WHERE route = ?1 ORDER BY origin")?;
        let rows = stmt.query_map([route], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| anyhow!("Failed to list origins of {}: {}", route, e))
    }

    /// Route prefixes registered with an origin
    pub fn routes_for_origin(&self, origin: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT route FROM rpsl_origin WHERE origin = ?1 ORDER BY id")?;
        let rows = stmt.query_map([origin], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| anyhow!("Failed to list routes of {}: {}", origin, e))
    }

    /// Objects of the given types that reference a maintainer
    pub fn owners_for_mntby(&self, mntby: &str, keys: &[&str]) -> Result<Vec<MntByOwner>> {
        let mut stmt = self.conn.prepare(
            "SELECT key, value FROM rpsl_mntby WHERE mntby = ?1 ORDER BY key, value",
        )?;
        let rows = stmt.query_map([mntby], |row| {
            Ok(MntByOwner {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?;

        let mut owners = Vec::new();
        for row in rows {
            let owner = row.map_err(|e| anyhow!("Failed to read mnt-by row: {}", e))?;
            if keys.contains(&owner.key.as_str()) {
                owners.push(owner);
            }
        }
        Ok(owners)
    }

    pub fn counts(&self) -> Result<RpslCounts> {
        let count = |table: &str| -> Result<u64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })
                .map_err(|e| anyhow!("Failed to count {}: {}", table, e))
        };
        Ok(RpslCounts {
            objects: count("rpsl")?,
            origins: count("rpsl_origin")?,
            mntby: count("rpsl_mntby")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseConn, SchemaManager};

    fn setup() -> DatabaseConn {
        let db = DatabaseConn::open_in_memory().unwrap();
        SchemaManager::new(&db.conn).initialize().unwrap();
        db
    }

    #[test]
    fn test_insert_update_find() {
        let db = setup();
        let repo = RpslRepository::new(&db.conn);

        repo.insert("aut-num", "AS64496", "aut-num: AS64496\n", "ripe")
            .unwrap();
        assert!(repo.insert("aut-num", "as64496", "dup\n", "apnic").is_err());
        let (_, owner) = repo.get_owned_block("aut-num", "AS64496").unwrap().unwrap();
        assert_eq!(owner, "ripe");

        repo.update("aut-num", "AS64496", "aut-num: AS64496\nas-name: FOO\n", "radb")
            .unwrap();
        let block = repo.get_block("aut-num", "as64496").unwrap().unwrap();
        assert!(block.contains("FOO"));
        let (_, owner) = repo.get_owned_block("aut-num", "AS64496").unwrap().unwrap();
        assert_eq!(owner, "radb");

        repo.claim("aut-num", "as64496", "ripe").unwrap();
        let (_, owner) = repo.get_owned_block("aut-num", "AS64496").unwrap().unwrap();
        assert_eq!(owner, "ripe");

        let found = repo.find(&["route", "aut-num"], "AS64496").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "aut-num");
        assert!(repo.get_block("as-set", "AS64496").unwrap().is_none());
    }

    #[test]
    fn test_origin_index() {
        let db = setup();
        let repo = RpslRepository::new(&db.conn);

        assert!(repo.add_origin("AS64496", "192.0.2.0/24", "ripe").unwrap());
        assert!(!repo.add_origin("as64496", "192.0.2.0/24", "ripe").unwrap());
        assert!(repo.add_origin("AS64497", "192.0.2.0/24", "ripe").unwrap());
        assert!(repo.add_origin("AS64496", "2001:db8::/32", "ripe").unwrap());
        // same pair listed by another dump moves over, then is stable
        assert!(repo.add_origin("AS64496", "2001:db8::/32", "apnic").unwrap());
        assert!(!repo.add_origin("AS64496", "2001:db8::/32", "apnic").unwrap());

        assert_eq!(
            repo.origins_for_route("192.0.2.0/24").unwrap(),
            vec!["AS64496".to_string(), "AS64497".to_string()]
        );
        assert_eq!(repo.routes_for_origin("as64496").unwrap().len(), 2);
    }

    #[test]
    fn test_mntby_index_filters_by_type() {
        let db = setup();
        let repo = RpslRepository::new(&db.conn);

        repo.add_mntby("aut-num", "AS64496", "MAINT-FOO", "ripe").unwrap();
        repo.add_mntby("as-set", "AS-FOO", "MAINT-FOO", "ripe").unwrap();
        repo.add_mntby("role", "FOO-RIPE", "MAINT-FOO", "ripe").unwrap();
        repo.add_mntby("aut-num", "AS64497", "MAINT-BAR", "ripe").unwrap();

        let owners = repo
            .owners_for_mntby("maint-foo", &["aut-num", "as-set"])
            .unwrap();
        let values: Vec<&str> = owners.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["AS-FOO", "AS64496"]);

        let roles = repo.owners_for_mntby("MAINT-FOO", &["role"]).unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(
            repo.counts().unwrap(),
            RpslCounts {
                objects: 0,
                origins: 0,
                mntby: 4
            }
        );
    }
}
