//! Per-address geolocation labels

use anyhow::{anyhow, Result};
use rusqlite::{Connection, OptionalExtension};

pub struct GeoRepository<'a> {
    conn: &'a Connection,
}

impl<'a> GeoRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Labels stored for a range bound, `|`-separated
    pub fn get(&self, ipaddress: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT geo FROM geo WHERE ipaddress = ?1",
                [ipaddress],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| anyhow!("Failed to read geo label of {}: {}", ipaddress, e))
    }

    pub fn upsert(&self, ipaddress: &str, geo: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO geo (ipaddress, geo) VALUES (?1, ?2)
                 ON CONFLICT(ipaddress) DO UPDATE SET geo = excluded.geo",
                [ipaddress, geo],
            )
            .map_err(|e| anyhow!("Failed to store geo label of {}: {}", ipaddress, e))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM geo", [])
            .map_err(|e| anyhow!("Failed to clear geo labels: {}", e))
    }

    pub fn count(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM geo", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to count geo labels: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseConn, SchemaManager};

    #[test]
    fn test_upsert_replaces() {
        let db = DatabaseConn::open_in_memory().unwrap();
        SchemaManager::new(&db.conn).initialize().unwrap();
        let repo = GeoRepository::new(&db.conn);

        repo.upsert("0001", "Kyiv,,Ukraine,UA").unwrap();
        repo.upsert("0001", "Kyiv,,Ukraine,UA|Lviv,,Ukraine,UA")
            .unwrap();
        assert_eq!(repo.count().unwrap(), 1);
        assert!(repo.get("0001").unwrap().unwrap().contains("Lviv"));

        assert_eq!(repo.clear().unwrap(), 1);
        assert!(repo.get("0001").unwrap().is_none());
    }
}
