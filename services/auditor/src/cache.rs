//! SQLite-backed metadata cache.
//!
//! Blob info and resolved manifests are immutable for a given key, so the
//! cache is write-through and never invalidated. It survives process runs,
//! letting repeated audits skip most registry traffic.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use regstat_registry::{BlobDigest, BlobInfo, Manifest};

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt cache entry: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable cache keyed by blob digest or `image:tag`.
pub struct MetadataCache {
    conn: Mutex<Connection>,
}

impl MetadataCache {
    /// Open or create a cache at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    /// Open an in-memory cache (for testing).
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let cache = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blob_info (
                digest TEXT PRIMARY KEY,
                info TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS manifests (
                reference TEXT PRIMARY KEY,
                layers TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Metadata cache schema initialized");
        Ok(())
    }

    pub fn get_blob_info(&self, digest: &BlobDigest) -> Result<Option<BlobInfo>, CacheError> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT info FROM blob_info WHERE digest = ?1",
                params![digest.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    pub fn put_blob_info(&self, digest: &BlobDigest, info: &BlobInfo) -> Result<(), CacheError> {
        let raw = serde_json::to_string(info)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO blob_info (digest, info) VALUES (?1, ?2)",
            params![digest.as_str(), raw],
        )?;
        Ok(())
    }

    /// Previously resolved manifest for `image:tag`.
    pub fn get_manifest(&self, image: &str, tag: &str) -> Result<Option<Manifest>, CacheError> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT layers FROM manifests WHERE reference = ?1",
                params![reference(image, tag)],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    pub fn put_manifest(&self, image: &str, tag: &str, manifest: &Manifest) -> Result<(), CacheError> {
        let raw = serde_json::to_string(manifest)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO manifests (reference, layers) VALUES (?1, ?2)",
            params![reference(image, tag), raw],
        )?;
        Ok(())
    }

    /// Number of cached blob infos and manifests.
    pub fn counts(&self) -> Result<(u64, u64), CacheError> {
        let conn = self.conn.lock();
        let blobs: i64 = conn.query_row("SELECT COUNT(*) FROM blob_info", [], |row| row.get(0))?;
        let manifests: i64 =
            conn.query_row("SELECT COUNT(*) FROM manifests", [], |row| row.get(0))?;
        Ok((blobs as u64, manifests as u64))
    }

    /// Drop both tables so every later read and write fails.
    #[cfg(test)]
    pub(crate) fn drop_tables(&self) {
        self.conn
            .lock()
            .execute_batch("DROP TABLE blob_info; DROP TABLE manifests;")
            .unwrap();
    }
}

fn reference(image: &str, tag: &str) -> String {
    format!("{image}:{tag}")
}
