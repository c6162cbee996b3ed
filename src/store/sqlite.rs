//! SQLite catalogue backend

use crate::store::catalogue::{Catalogue, DownloadRecord};
use crate::store::schema::SCHEMA_SQL;
use crate::store::StoreResult;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct SqliteCatalogue {
    conn: Connection,
}

impl SqliteCatalogue {
    /// Opens (and if necessary creates) the catalogue at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        // WAL lets the periodic snapshot read while a worker writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// In-memory catalogue for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }
}

impl Catalogue for SqliteCatalogue {
    fn path_by_sha(&self, sha256: &str) -> StoreResult<Option<String>> {
        let path = self
            .conn
            .query_row(
                "SELECT path FROM apks WHERE sha256 = ?1",
                params![sha256],
                |row| row.get(0),
            )
            .optional()?;
        Ok(path)
    }

    fn version_exists(
        &self,
        identifier: &str,
        version: &str,
        market: &str,
    ) -> StoreResult<Option<Option<String>>> {
        let row = self
            .conn
            .query_row(
                "SELECT sha256 FROM versions
                 WHERE identifier = ?1 AND version = ?2 AND market = ?3",
                params![identifier, version, market],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(row)
    }

    fn insert_package(&self, identifier: &str, market: &str, url: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO packages (identifier, market, url, observed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![identifier, market, url, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_version(
        &self,
        identifier: &str,
        version: &str,
        market: &str,
        sha256: Option<&str>,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO versions (identifier, version, market, sha256, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![identifier, version, market, sha256, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_apk(
        &self,
        sha256: &str,
        path: &str,
        size: u64,
        md5: Option<&str>,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO apks (sha256, path, size, md5, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![sha256, path, size as i64, md5, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn record_download(&self, record: &DownloadRecord<'_>) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT OR IGNORE INTO apks (sha256, path, size, md5, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.sha256, record.path, record.size as i64, record.md5, now],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO versions (identifier, version, market, sha256, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.identifier, record.version, record.market, record.sha256, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn observed_packages(&self, market: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT identifier FROM packages WHERE market = ?1 ORDER BY identifier",
        )?;
        let rows = stmt.query_map(params![market], |row| row.get::<_, String>(0))?;
        let mut packages = Vec::new();
        for row in rows {
            packages.push(row?);
        }
        Ok(packages)
    }
}
