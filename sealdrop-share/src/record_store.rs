//! SQLite persistence for share records and in-flight download leases.
//!
//! Every mutation of `download_count` happens inside a single conditional
//! statement or transaction while the connection mutex is held, so the
//! counter can never be read, checked and written as separate steps.

use crate::error::{ShareError, ShareResult};
use crate::record::{RecordId, ShareRecord};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, ciphertext_ref, filename, mime_type, declared_size, stored_size, \
     iv, salt, max_downloads, download_count, created_at, expires_at";

/// Persists share records and the download slots reserved against them.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    /// Opens or creates a record store at the given path.
    pub fn open(path: &Path) -> ShareResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory record store (for testing).
    pub fn open_in_memory() -> ShareResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> ShareResult<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> ShareResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| ShareError::Storage(e.to_string()))
    }

    /// Inserts a new record. Fails if the id already exists.
    pub fn insert(&self, record: &ShareRecord) -> ShareResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO share_records ({RECORD_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                record.id.as_str(),
                record.ciphertext_ref,
                record.filename,
                record.mime_type,
                record.declared_size as i64,
                record.stored_size as i64,
                record.iv,
                record.salt,
                record.max_downloads,
                record.download_count,
                record.created_at.timestamp_millis(),
                record.expires_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &RecordId) -> ShareResult<Option<ShareRecord>> {
        let conn = self.lock()?;
        load(&conn, id)
    }

    /// Reserves one download slot for `id`.
    ///
    /// The lease row is inserted only if the record exists, has not expired,
    /// and its committed downloads plus live leases stay below
    /// `max_downloads`. Leases not renewed within `lease_timeout` don't count.
    /// Returns the lease id, or the gating error that blocked it.
    pub fn reserve_download(
        &self,
        id: &RecordId,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> ShareResult<String> {
        let lease_id = Uuid::new_v4().to_string();
        let now_ms = now.timestamp_millis();
        let stale_before = lease_cutoff(now, lease_timeout);

        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO download_leases (lease_id, record_id, renewed_at)
             SELECT ?1, r.id, ?2
             FROM share_records r
             WHERE r.id = ?3
               AND r.expires_at > ?2
               AND r.download_count + (
                     SELECT COUNT(*) FROM download_leases l
                     WHERE l.record_id = r.id AND l.renewed_at > ?4
                   ) < r.max_downloads",
            params![lease_id, now_ms, id.as_str(), stale_before],
        )?;

        if inserted == 1 {
            return Ok(lease_id);
        }

        // Nothing was written; report why.
        match load(&conn, id)? {
            None => Err(ShareError::NotFound),
            Some(record) if record.is_expired(now) => Err(ShareError::Expired),
            Some(_) => Err(ShareError::LimitReached),
        }
    }

    /// Converts a lease into a counted download.
    ///
    /// Deletes the lease and increments `download_count` in one transaction,
    /// guarded by `download_count < max_downloads`. Returns the downloads
    /// remaining afterwards.
    pub fn commit_download(&self, lease_id: &str, id: &RecordId) -> ShareResult<u32> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let released = tx.execute(
            "DELETE FROM download_leases WHERE lease_id = ?1",
            params![lease_id],
        )?;
        let updated = tx.execute(
            "UPDATE share_records SET download_count = download_count + 1
             WHERE id = ?1 AND download_count < max_downloads",
            params![id.as_str()],
        )?;

        if updated == 0 {
            // Dropping `tx` rolls back, leaving the lease for its owner to release.
            return match load(&tx, id)? {
                None => Err(ShareError::NotFound),
                Some(_) => Err(ShareError::LimitReached),
            };
        }
        if released == 0 {
            warn!(record_id = %id, "download lease was reaped before commit");
        }

        let remaining: u32 = tx.query_row(
            "SELECT max_downloads - download_count FROM share_records WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(remaining)
    }

    /// Gives a reserved slot back without counting a download.
    pub fn release_download(&self, lease_id: &str) -> ShareResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM download_leases WHERE lease_id = ?1",
            params![lease_id],
        )?;
        Ok(removed > 0)
    }

    /// Renews a lease so a transfer that is still making progress keeps its
    /// slot. Returns `false` if the lease is gone or already stale; a stale
    /// lease has forfeited its slot and can't be revived.
    pub fn touch_lease(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> ShareResult<bool> {
        let conn = self.lock()?;
        let renewed = conn.execute(
            "UPDATE download_leases SET renewed_at = ?2 WHERE lease_id = ?1 AND renewed_at > ?3",
            params![lease_id, now.timestamp_millis(), lease_cutoff(now, lease_timeout)],
        )?;
        Ok(renewed > 0)
    }

    /// Number of unexpired leases currently held against `id`.
    pub fn live_leases(
        &self,
        id: &RecordId,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> ShareResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM download_leases WHERE record_id = ?1 AND renewed_at > ?2",
            params![id.as_str(), lease_cutoff(now, lease_timeout)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Removes a record and its leases, returning the removed record.
    /// Unknown ids return `None`.
    pub fn delete(&self, id: &RecordId) -> ShareResult<Option<ShareRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let record = load(&tx, id)?;
        if record.is_some() {
            tx.execute(
                "DELETE FROM download_leases WHERE record_id = ?1",
                params![id.as_str()],
            )?;
            tx.execute("DELETE FROM share_records WHERE id = ?1", params![id.as_str()])?;
        }
        tx.commit()?;
        Ok(record)
    }

    /// Ids of every record whose expiry is at or before `now`.
    pub fn expired_ids(&self, now: DateTime<Utc>) -> ShareResult<Vec<RecordId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM share_records WHERE expires_at <= ?1")?;
        let ids = stmt
            .query_map(params![now.timestamp_millis()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(RecordId::from_stored).collect())
    }

    /// Deletes leases older than `lease_timeout`; they belong to transfers
    /// that died without releasing.
    pub fn reap_stale_leases(&self, now: DateTime<Utc>, lease_timeout: Duration) -> ShareResult<usize> {
        let conn = self.lock()?;
        let reaped = conn.execute(
            "DELETE FROM download_leases WHERE renewed_at <= ?1",
            params![lease_cutoff(now, lease_timeout)],
        )?;
        if reaped > 0 {
            debug!(reaped, "reaped stale download leases");
        }
        Ok(reaped)
    }

    /// Number of stored records.
    pub fn count(&self) -> ShareResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM share_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Leases acquired at or before this instant (unix millis) are stale.
fn lease_cutoff(now: DateTime<Utc>, lease_timeout: Duration) -> i64 {
    now.checked_sub_signed(lease_timeout)
        .map_or(i64::MIN, |cutoff| cutoff.timestamp_millis())
}

fn load(conn: &Connection, id: &RecordId) -> ShareResult<Option<ShareRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM share_records WHERE id = ?1"),
            params![id.as_str()],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ShareRecord> {
    let declared_size: i64 = row.get(4)?;
    let stored_size: i64 = row.get(5)?;
    let created_at: i64 = row.get(10)?;
    let expires_at: i64 = row.get(11)?;

    Ok(ShareRecord {
        id: RecordId::from_stored(row.get(0)?),
        ciphertext_ref: row.get(1)?,
        filename: row.get(2)?,
        mime_type: row.get(3)?,
        declared_size: declared_size as u64,
        stored_size: stored_size as u64,
        iv: row.get(6)?,
        salt: row.get(7)?,
        max_downloads: row.get(8)?,
        download_count: row.get(9)?,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
        // An unreadable expiry is treated as already expired.
        expires_at: DateTime::from_timestamp_millis(expires_at).unwrap_or_default(),
    })
}

fn initialize_schema(conn: &Connection) -> ShareResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS share_records (
            id TEXT PRIMARY KEY,
            ciphertext_ref TEXT NOT NULL,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            declared_size INTEGER NOT NULL CHECK (declared_size >= 0),
            stored_size INTEGER NOT NULL CHECK (stored_size >= 0),
            iv TEXT NOT NULL,
            salt TEXT NOT NULL,
            max_downloads INTEGER NOT NULL CHECK (max_downloads >= 1),
            download_count INTEGER NOT NULL DEFAULT 0
                CHECK (download_count >= 0 AND download_count <= max_downloads),
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_share_records_expires ON share_records(expires_at);

        CREATE TABLE IF NOT EXISTS download_leases (
            lease_id TEXT PRIMARY KEY,
            record_id TEXT NOT NULL,
            renewed_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_download_leases_record ON download_leases(record_id);
        "#,
    )?;
    Ok(())
}
