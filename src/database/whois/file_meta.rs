//! Sync state of upstream source files
//!
//! A source is considered unchanged when both its `Last-Modified` value and
//! its size match what was recorded after the last successful sync.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Recorded state of one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMeta {
    pub url: String,
    pub last_modified: String,
    pub file_size: u64,
}

impl FileMeta {
    pub fn matches(&self, last_modified: &str, file_size: u64) -> bool {
        self.last_modified == last_modified && self.file_size == file_size
    }
}

pub struct FileMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> FileMetaRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, url: &str) -> Result<Option<FileMeta>> {
        self.conn
            .query_row(
                "SELECT url, last_modified, file_size FROM file_metadata WHERE url = ?1",
                [url],
                |row| {
                    Ok(FileMeta {
                        url: row.get(0)?,
                        last_modified: row.get(1)?,
                        file_size: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| anyhow!("Failed to read file metadata of {}: {}", url, e))
    }

    pub fn record(&self, url: &str, last_modified: &str, file_size: u64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO file_metadata (url, last_modified, file_size) VALUES (?1, ?2, ?3)
                 ON CONFLICT(url) DO UPDATE SET
                    last_modified = excluded.last_modified,
                    file_size = excluded.file_size",
                params![url, last_modified, file_size],
            )
            .map_err(|e| anyhow!("Failed to record file metadata of {}: {}", url, e))?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<FileMeta>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url, last_modified, file_size FROM file_metadata ORDER BY url")?;
        let rows = stmt.query_map([], |row| {
            Ok(FileMeta {
                url: row.get(0)?,
                last_modified: row.get(1)?,
                file_size: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| anyhow!("Failed to list file metadata: {}", e))
    }

    /// Forget one source; returns true if it had recorded state
    pub fn forget(&self, url: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM file_metadata WHERE url = ?1", [url])
            .map_err(|e| anyhow!("Failed to forget file metadata of {}: {}", url, e))?;
        Ok(removed > 0)
    }

    /// Forget recorded state so the next sync reprocesses every source
    pub fn clear(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM file_metadata", [])
            .map_err(|e| anyhow!("Failed to clear file metadata: {}", e))
    }
}
