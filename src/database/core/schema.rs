//! Database schema management
//!
//! All persistent tables of the whois mirror are defined here. Per-file
//! snapshot tables used during sweeps are TEMP tables owned by the
//! ingestors and never appear in this schema.

use anyhow::{anyhow, Result};
use rusqlite::Connection;

/// Current schema version
/// Increment this when making breaking schema changes
pub const SCHEMA_VERSION: u32 = 4;

/// Tables that must exist for the schema to count as intact
const REQUIRED_TABLES: &[&str] = &[
    "whois_meta",
    "asn",
    "ipv4",
    "ipv6",
    "rpsl",
    "rpsl_origin",
    "rpsl_mntby",
    "geo",
    "file_metadata",
];

/// Schema definitions for all tables in the whois database
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// SQL for creating the meta table (tracks schema version and global metadata)
    pub const META_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS whois_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
    "#;

    /// ASN allocations; one row per ASN, owned by (coordinator, identifier)
    pub const ASN_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS asn (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            coordinator TEXT NOT NULL,
            country TEXT NOT NULL,
            asn INTEGER NOT NULL UNIQUE,
            date TEXT NOT NULL,
            identifier TEXT NOT NULL,
            name TEXT,
            geo TEXT NOT NULL DEFAULT '',
            UNIQUE (coordinator, asn, identifier)
        );
    "#;

    pub const IPV4_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS ipv4 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            coordinator TEXT NOT NULL,
            country TEXT NOT NULL,
            network TEXT NOT NULL,
            firstip TEXT NOT NULL,
            lastip TEXT NOT NULL,
            date TEXT NOT NULL,
            identifier TEXT NOT NULL,
            UNIQUE (coordinator, network, identifier)
        );
    "#;

    pub const IPV6_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS ipv6 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            coordinator TEXT NOT NULL,
            country TEXT NOT NULL,
            network TEXT NOT NULL,
            firstip TEXT NOT NULL,
            lastip TEXT NOT NULL,
            date TEXT NOT NULL,
            identifier TEXT NOT NULL,
            UNIQUE (coordinator, network, identifier)
        );
    "#;

    /// SQL for creating allocation indexes
    pub const ALLOCATION_INDEXES: &'static [&'static str] = &[
        "CREATE INDEX IF NOT EXISTS idx_asn_owner ON asn(coordinator, identifier)",
        "CREATE INDEX IF NOT EXISTS idx_ipv4_firstip ON ipv4(firstip)",
        "CREATE INDEX IF NOT EXISTS idx_ipv4_lastip ON ipv4(lastip)",
        "CREATE INDEX IF NOT EXISTS idx_ipv4_owner ON ipv4(coordinator, identifier)",
        "CREATE INDEX IF NOT EXISTS idx_ipv6_firstip ON ipv6(firstip)",
        "CREATE INDEX IF NOT EXISTS idx_ipv6_lastip ON ipv6(lastip)",
        "CREATE INDEX IF NOT EXISTS idx_ipv6_owner ON ipv6(coordinator, identifier)",
    ];

    /// RPSL objects of the persisted types, keyed by (type, primary value)
    ///
    /// `source` names the dump that last wrote the row; the RPSL tables
    /// carry it so a dump's sweep only removes its own rows.
    pub const RPSL_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS rpsl (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL,
            value TEXT NOT NULL COLLATE NOCASE,
            block TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT '',
            UNIQUE (key, value)
        );
    "#;

    /// Route prefix to origin ASN pairs extracted from route/route6 objects
    pub const RPSL_ORIGIN_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS rpsl_origin (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            origin TEXT NOT NULL COLLATE NOCASE,
            route TEXT NOT NULL COLLATE NOCASE,
            source TEXT NOT NULL DEFAULT '',
            UNIQUE (origin, route)
        );
    "#;

    /// Maintainer references extracted from aut-num/as-set/role objects
    pub const RPSL_MNTBY_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS rpsl_mntby (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL,
            value TEXT NOT NULL COLLATE NOCASE,
            mntby TEXT NOT NULL COLLATE NOCASE,
            source TEXT NOT NULL DEFAULT '',
            UNIQUE (mntby, key, value)
        );
    "#;

    pub const RPSL_INDEXES: &'static [&'static str] = &[
        "CREATE INDEX IF NOT EXISTS idx_rpsl_origin_route ON rpsl_origin(route)",
        "CREATE INDEX IF NOT EXISTS idx_rpsl_mntby_owner ON rpsl_mntby(key, value)",
        "CREATE INDEX IF NOT EXISTS idx_rpsl_source ON rpsl(source, key)",
        "CREATE INDEX IF NOT EXISTS idx_rpsl_origin_source ON rpsl_origin(source)",
        "CREATE INDEX IF NOT EXISTS idx_rpsl_mntby_source ON rpsl_mntby(source, key)",
    ];

    /// Per-address geolocation labels, keyed by range bound
    pub const GEO_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS geo (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ipaddress TEXT NOT NULL UNIQUE,
            geo TEXT NOT NULL
        );
    "#;

    /// Last observed metadata of each synced source
    pub const FILE_METADATA_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS file_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            last_modified TEXT NOT NULL,
            file_size INTEGER NOT NULL
        );
    "#;
}

/// Schema manager for the whois database
///
/// Handles schema initialization, version checking, and resets.
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    /// Create a new schema manager for the given connection
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Initialize the database schema
    ///
    /// Creates all tables and indexes if they don't exist and records the
    /// schema version in the meta table.
    pub fn initialize(&self) -> Result<()> {
        self.conn
            .execute(SchemaDefinitions::META_TABLE, [])
            .map_err(|e| anyhow!("Failed to create meta table: {}", e))?;

        self.set_meta("schema_version", &SCHEMA_VERSION.to_string())?;

        let tables = [
            ("asn", SchemaDefinitions::ASN_TABLE),
            ("ipv4", SchemaDefinitions::IPV4_TABLE),
            ("ipv6", SchemaDefinitions::IPV6_TABLE),
            ("rpsl", SchemaDefinitions::RPSL_TABLE),
            ("rpsl_origin", SchemaDefinitions::RPSL_ORIGIN_TABLE),
            ("rpsl_mntby", SchemaDefinitions::RPSL_MNTBY_TABLE),
            ("geo", SchemaDefinitions::GEO_TABLE),
            ("file_metadata", SchemaDefinitions::FILE_METADATA_TABLE),
        ];
        for (name, sql) in tables {
            self.conn
                .execute(sql, [])
                .map_err(|e| anyhow!("Failed to create {} table: {}", name, e))?;
        }

        for index_sql in SchemaDefinitions::ALLOCATION_INDEXES {
            self.conn
                .execute(index_sql, [])
                .map_err(|e| anyhow!("Failed to create allocation index: {}", e))?;
        }

        for index_sql in SchemaDefinitions::RPSL_INDEXES {
            self.conn
                .execute(index_sql, [])
                .map_err(|e| anyhow!("Failed to create RPSL index: {}", e))?;
        }

        Ok(())
    }

    /// Check the current schema status
    pub fn check_status(&self) -> Result<SchemaStatus> {
        if !self.table_exists("whois_meta")? {
            return Ok(SchemaStatus::NotInitialized);
        }

        let current_version = self.get_schema_version()?;

        if current_version == SCHEMA_VERSION {
            if self.verify_integrity()? {
                Ok(SchemaStatus::Current)
            } else {
                Ok(SchemaStatus::Corrupted)
            }
        } else if current_version < SCHEMA_VERSION {
            Ok(SchemaStatus::NeedsMigration {
                from: current_version,
                to: SCHEMA_VERSION,
            })
        } else {
            Ok(SchemaStatus::Incompatible {
                database_version: current_version,
                required_version: SCHEMA_VERSION,
            })
        }
    }

    fn get_schema_version(&self) -> Result<u32> {
        let version = self
            .get_meta("schema_version")?
            .unwrap_or_else(|| "0".to_string());

        version
            .parse()
            .map_err(|e| anyhow!("Invalid schema version: {}", e))
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: i32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to check table {}: {}", table, e))?;
        Ok(exists > 0)
    }

    fn verify_integrity(&self) -> Result<bool> {
        for table in REQUIRED_TABLES {
            if !self.table_exists(table)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Set a metadata value
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO whois_meta (key, value, updated_at) VALUES (?1, ?2, strftime('%s', 'now'))",
                [key, value],
            )
            .map_err(|e| anyhow!("Failed to set meta value: {}", e))?;
        Ok(())
    }

    /// Get a metadata value
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let result: Result<String, _> = self.conn.query_row(
            "SELECT value FROM whois_meta WHERE key = ?1",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("Failed to get meta value: {}", e)),
        }
    }

    /// Reset the database by dropping all tables
    pub fn reset(&self) -> Result<()> {
        for table in REQUIRED_TABLES.iter().rev() {
            self.conn
                .execute(&format!("DROP TABLE IF EXISTS {}", table), [])
                .map_err(|e| anyhow!("Failed to drop table {}: {}", table, e))?;
        }
        Ok(())
    }
}

/// Status of the database schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Database is not initialized (fresh database)
    NotInitialized,

    /// Schema is current and valid
    Current,

    /// Schema needs migration from an older version
    NeedsMigration { from: u32, to: u32 },

    /// Database is from a newer version (incompatible)
    Incompatible {
        database_version: u32,
        required_version: u32,
    },

    /// Schema is corrupted (missing tables)
    Corrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_schema_lifecycle() {
        let conn = create_test_db();
        let manager = SchemaManager::new(&conn);

        assert_eq!(
            manager.check_status().unwrap(),
            SchemaStatus::NotInitialized
        );

        manager.initialize().unwrap();
        assert_eq!(manager.check_status().unwrap(), SchemaStatus::Current);
        assert_eq!(manager.get_schema_version().unwrap(), SCHEMA_VERSION);

        manager.reset().unwrap();
        assert_eq!(
            manager.check_status().unwrap(),
            SchemaStatus::NotInitialized
        );
    }

    #[test]
    fn test_schema_detects_missing_table() {
        let conn = create_test_db();
        let manager = SchemaManager::new(&conn);
        manager.initialize().unwrap();

        conn.execute("DROP TABLE rpsl_mntby", []).unwrap();
        assert_eq!(manager.check_status().unwrap(), SchemaStatus::Corrupted);
    }

    #[test]
    fn test_schema_version_mismatch() {
        let conn = create_test_db();
        let manager = SchemaManager::new(&conn);
        manager.initialize().unwrap();

        manager.set_meta("schema_version", "1").unwrap();
        assert_eq!(
            manager.check_status().unwrap(),
            SchemaStatus::NeedsMigration {
                from: 1,
                to: SCHEMA_VERSION
            }
        );

        manager
            .set_meta("schema_version", &(SCHEMA_VERSION + 1).to_string())
            .unwrap();
        assert!(matches!(
            manager.check_status().unwrap(),
            SchemaStatus::Incompatible { .. }
        ));
    }

    #[test]
    fn test_asn_is_unique() {
        let conn = create_test_db();
        SchemaManager::new(&conn).initialize().unwrap();

        conn.execute(
            "INSERT INTO asn (coordinator, country, asn, date, identifier) VALUES ('ripencc', 'UA', 64496, '20240101', 'a')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO asn (coordinator, country, asn, date, identifier) VALUES ('arin', 'US', 64496, '20240101', 'b')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_rpsl_value_is_case_insensitive() {
        let conn = create_test_db();
        SchemaManager::new(&conn).initialize().unwrap();

        conn.execute(
            "INSERT INTO rpsl (key, value, block) VALUES ('mntner', 'MAINT-FOO', 'x')",
            [],
        )
        .unwrap();
        let found: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM rpsl WHERE key = 'mntner' AND value = 'maint-foo'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(found, 1);
    }
}
