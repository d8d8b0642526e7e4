#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Whoislite - a local whois mirror
//!
//! Whoislite keeps a SQLite copy of public registry data and answers
//! whois-style questions from it without touching the network:
//!
//! - RIR delegated-extended files (ASN, IPv4 and IPv6 allocations)
//! - the AS name list (`asn.txt`)
//! - RPSL database dumps (aut-num, as-set, route, route6, mntner, role,
//!   organisation objects)
//! - geolocation feeds, folded into per-ASN and per-address labels
//!
//! It can be used as both a command-line application and a library.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `database` | Store, address codec, feed ingestion, lenses | `rusqlite`, `oneio`, `ureq`, `ipnet` |
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | The `whoislite` binary | All above + `clap`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! - **[`address`]**: address/CIDR codec and fixed-width range bounds
//! - **[`database`]**: SQLite store and its repositories
//! - **[`ingest`]**: feed ingestors and the sync pipeline
//! - **[`lens`]**: whois answer composition
//! - **[`config`]**: configuration management (always available)
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use whoislite::database::WhoisDatabase;
//! use whoislite::ingest::{DefaultSourceProvider, SyncOptions, SyncPipeline};
//! use whoislite::lens::whois::{WhoisLens, WhoisQueryArgs, WhoisQueryType};
//! use whoislite::WhoisLiteConfig;
//!
//! let config = WhoisLiteConfig::new(&None)?;
//! let db = WhoisDatabase::open(&config.sqlite_path())?;
//!
//! let provider = DefaultSourceProvider::from_config(&config);
//! let report = SyncPipeline::new(&db, provider).run(&config, &SyncOptions::default())?;
//! println!("{} sources processed", report.processed());
//!
//! let lens = WhoisLens::new(&db);
//! let answer = lens.query(&WhoisQueryArgs::new(WhoisQueryType::MntBy, "MAINT-FOO"))?;
//! print!("{}", answer);
//! ```

pub mod config;

#[cfg(feature = "database")]
pub mod address;

#[cfg(feature = "database")]
pub mod database;

#[cfg(feature = "database")]
pub mod ingest;

#[cfg(feature = "database")]
pub mod lens;

// =============================================================================
// Configuration (always available)
// =============================================================================

pub use config::{format_size, SqliteDatabaseInfo, WhoisLiteConfig};

#[cfg(feature = "database")]
pub use config::get_sqlite_info;

// =============================================================================
// Store, ingestion and lenses
// =============================================================================

#[cfg(feature = "database")]
pub use database::{SchemaManager, SchemaStatus, StoreCounts, WhoisDatabase, SCHEMA_VERSION};

#[cfg(feature = "database")]
pub use ingest::{FeedKind, SyncOptions, SyncPipeline, SyncReport, SyncStats};

#[cfg(feature = "database")]
pub use lens::utils::OutputFormat;

#[cfg(feature = "database")]
pub use lens::whois::{WhoisAnswer, WhoisLens, WhoisQueryArgs, WhoisQueryType};
