//! Database connection management
//!
//! Thin wrapper around the SQLite connection that backs the whois mirror.

use anyhow::{anyhow, Result};
use rusqlite::Connection;

/// Core database connection wrapper
///
/// `DatabaseConn` opens either a file-backed or an in-memory SQLite
/// database and applies the same pragmas to both, so ingestion tests run
/// against the exact configuration used in production.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| anyhow!("Failed to open database at '{}': {}", p, e))?,
            None => Connection::open_in_memory()
                .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?,
        };

        let db = DatabaseConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Open a database at the specified path (convenience method)
    pub fn open_path(path: &str) -> Result<Self> {
        Self::open(Some(path))
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(None)
    }

    fn configure(&self) -> Result<()> {
        // Must precede table creation to take effect on a fresh file
        self.conn
            .execute_batch("PRAGMA auto_vacuum=INCREMENTAL")
            .map_err(|e| anyhow!("Failed to set auto vacuum: {}", e))?;

        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to set journal mode: {}", e))?;

        self.conn
            .execute_batch("PRAGMA synchronous=NORMAL")
            .map_err(|e| anyhow!("Failed to set synchronous mode: {}", e))?;

        self.conn
            .execute_batch("PRAGMA cache_size=100000")
            .map_err(|e| anyhow!("Failed to set cache size: {}", e))?;

        // Per-file snapshot tables are TEMP tables
        self.conn
            .execute_batch("PRAGMA temp_store=MEMORY")
            .map_err(|e| anyhow!("Failed to set temp store: {}", e))?;

        self.conn
            .execute_batch("PRAGMA foreign_keys=ON")
            .map_err(|e| anyhow!("Failed to enable foreign keys: {}", e))?;

        Ok(())
    }

    /// Begin an unchecked transaction
    ///
    /// The sync pipeline wraps each source file in one of these.
    pub fn transaction(&self) -> Result<rusqlite::Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .map_err(|e| anyhow!("Failed to begin transaction: {}", e))
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", table_name);
        let count: u64 = self
            .conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to get table count: {}", e))?;
        Ok(count)
    }

    /// Number of unused pages waiting to be reclaimed
    pub fn freelist_count(&self) -> Result<u64> {
        self.conn
            .query_row("PRAGMA freelist_count", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to read freelist count: {}", e))
    }

    /// Reclaim free pages when more than `threshold` of them have piled up
    ///
    /// Returns true when a vacuum step ran.
    pub fn incremental_vacuum(&self, threshold: u64) -> Result<bool> {
        let free = self.freelist_count()?;
        if free <= threshold {
            return Ok(false);
        }
        self.conn
            .execute_batch("PRAGMA incremental_vacuum")
            .map_err(|e| anyhow!("Failed to run incremental vacuum: {}", e))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = DatabaseConn::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_table_count() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "CREATE TABLE sample (id INTEGER PRIMARY KEY);
                 INSERT INTO sample (id) VALUES (1), (2), (3);",
            )
            .unwrap();

        assert_eq!(db.table_count("sample").unwrap(), 3);
        assert!(db.table_count("missing").is_err());
    }

    #[test]
    fn test_incremental_vacuum_below_threshold() {
        let db = DatabaseConn::open_in_memory().unwrap();
        assert!(!db.incremental_vacuum(u64::MAX).unwrap());
    }

    #[test]
    fn test_file_database_reclaims_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vacuum.sqlite3");
        let db = DatabaseConn::open_path(path.to_str().unwrap()).unwrap();
        db.conn.execute_batch("CREATE TABLE filler (payload TEXT)").unwrap();
        for _ in 0..200 {
            db.conn
                .execute("INSERT INTO filler (payload) VALUES (?1)", ["x".repeat(2000)])
                .unwrap();
        }
        db.conn.execute_batch("DELETE FROM filler").unwrap();

        assert!(db.freelist_count().unwrap() > 0);
        assert!(db.incremental_vacuum(0).unwrap());
        assert_eq!(db.freelist_count().unwrap(), 0);
    }
}
