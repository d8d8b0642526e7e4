//! Database module
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # SQLite DatabaseConn wrapper
//! │   └── schema      # schema definitions and management
//! │
//! └── whois/          # Persistent storage
//!     ├── allocation  # ASN / IPv4 / IPv6 delegations
//!     ├── rpsl        # RPSL objects, origin and mnt-by indices
//!     ├── geo         # per-address geolocation labels
//!     └── file_meta   # sync state of upstream sources
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use whoislite::database::WhoisDatabase;
//!
//! let db = WhoisDatabase::open_in_dir("~/.whoislite")?;
//! let hit = db.allocations().narrowest_for_address("193.0.6.139")?;
//! ```

pub mod core;
pub mod whois;

pub use core::{DatabaseConn, SchemaDefinitions, SchemaManager, SchemaStatus, SCHEMA_VERSION};

pub use whois::{
    AddressFamily, AllocationRepository, AsnRecord, FileMeta, FileMetaRepository, GeoRepository,
    MntByOwner, NetworkRecord, RpslCounts, RpslObject, RpslRepository, StoreCounts,
    WhoisDatabase,
};

/// Ensure the data directory exists
pub fn ensure_data_dir(data_dir: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))
}
