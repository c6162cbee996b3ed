//! Postgres catalogue backend
//!
//! Same tables and semantics as the SQLite backend; idempotent inserts use
//! `ON CONFLICT DO NOTHING` instead of `INSERT OR IGNORE`.

use crate::store::catalogue::{Catalogue, DownloadRecord};
use crate::store::schema::SCHEMA_SQL_PG;
use crate::store::StoreResult;
use chrono::Utc;
use postgres::{Client, NoTls};
use std::sync::Mutex;

pub struct PostgresCatalogue {
    client: Mutex<Client>,
}

impl PostgresCatalogue {
    /// Connects with the configured connection string and applies the schema
    pub fn connect(connection_string: &str) -> StoreResult<Self> {
        let mut client = Client::connect(connection_string, NoTls)?;
        client.batch_execute(SCHEMA_SQL_PG)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

impl Catalogue for PostgresCatalogue {
    fn path_by_sha(&self, sha256: &str) -> StoreResult<Option<String>> {
        let mut client = self.client.lock().unwrap();
        let row = client.query_opt("SELECT path FROM apks WHERE sha256 = $1", &[&sha256])?;
        Ok(row.map(|r| r.get(0)))
    }

    fn version_exists(
        &self,
        identifier: &str,
        version: &str,
        market: &str,
    ) -> StoreResult<Option<Option<String>>> {
        let mut client = self.client.lock().unwrap();
        let row = client.query_opt(
            "SELECT sha256 FROM versions
             WHERE identifier = $1 AND version = $2 AND market = $3",
            &[&identifier, &version, &market],
        )?;
        Ok(row.map(|r| r.get::<_, Option<String>>(0)))
    }

    fn insert_package(&self, identifier: &str, market: &str, url: &str) -> StoreResult<()> {
        let mut client = self.client.lock().unwrap();
        client.execute(
            "INSERT INTO packages (identifier, market, url, observed_at)
             VALUES ($1, $2, $3, $4)",
            &[&identifier, &market, &url, &Utc::now().to_rfc3339()],
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
        let mut client = self.client.lock().unwrap();
        client.execute(
            "INSERT INTO versions (identifier, version, market, sha256, recorded_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (identifier, version, market) DO NOTHING",
            &[&identifier, &version, &market, &sha256, &Utc::now().to_rfc3339()],
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
        let mut client = self.client.lock().unwrap();
        client.execute(
            "INSERT INTO apks (sha256, path, size, md5, stored_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (sha256) DO NOTHING",
            &[&sha256, &path, &(size as i64), &md5, &Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn record_download(&self, record: &DownloadRecord<'_>) -> StoreResult<()> {
        let mut client = self.client.lock().unwrap();
        let mut tx = client.transaction()?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO apks (sha256, path, size, md5, stored_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (sha256) DO NOTHING",
            &[
                &record.sha256,
                &record.path,
                &(record.size as i64),
                &record.md5,
                &now,
            ],
        )?;
        tx.execute(
            "INSERT INTO versions (identifier, version, market, sha256, recorded_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (identifier, version, market) DO NOTHING",
            &[
                &record.identifier,
                &record.version,
                &record.market,
                &record.sha256,
                &now,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn observed_packages(&self, market: &str) -> StoreResult<Vec<String>> {
        let mut client = self.client.lock().unwrap();
        let rows = client.query(
            "SELECT DISTINCT identifier FROM packages WHERE market = $1 ORDER BY identifier",
            &[&market],
        )?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }
}
