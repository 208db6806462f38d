//! The share lifecycle: create, inspect, retrieve, delete, sweep.
//!
//! A retrieval holds a download lease from reservation until the ciphertext
//! has been fully handed to the sink. Only then is the download counted.
//! Dropping a [`Retrieval`] at any point before [`Retrieval::finish`]
//! releases the lease, so failed or cancelled transfers never consume a
//! download.

use crate::blob_store::BlobStore;
use crate::config::ShareConfig;
use crate::error::{ShareError, ShareResult};
use crate::record::{RecordId, ShareRecord};
use crate::record_store::RecordStore;
use crate::types::{CreateShare, CreateShareResponse, FileMetadata, RetrievalReceipt, SweepReport};
use chrono::{DateTime, Duration, Utc};
use sealdrop_crypto::TAG_SIZE;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

// ============================================================================
// ShareService
// ============================================================================

#[derive(Clone)]
pub struct ShareService {
    config: Arc<ShareConfig>,
    records: RecordStore,
    blobs: BlobStore,
}

impl ShareService {
    /// Opens the record database and blob directory under
    /// `config.storage_dir`, creating both if needed.
    pub async fn open(config: ShareConfig) -> ShareResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.storage_dir).await?;
        let blobs = BlobStore::open(config.blob_dir()).await?;
        let records = RecordStore::open(&config.database_path())?;

        info!(
            "share service opened at {}",
            config.storage_dir.display()
        );
        Ok(Self {
            config: Arc::new(config),
            records,
            blobs,
        })
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    /// Stores an uploaded ciphertext and its metadata.
    ///
    /// All request fields are validated before the first byte is read. The
    /// stream must come within `size_tolerance_bytes` of
    /// `declared_size + TAG_SIZE`. On failure nothing is left behind.
    pub async fn create<R>(
        &self,
        request: CreateShare,
        source: &mut R,
    ) -> ShareResult<CreateShareResponse>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if request.declared_size > self.config.max_upload_bytes {
            return Err(ShareError::PayloadTooLarge {
                size: request.declared_size,
                max: self.config.max_upload_bytes,
            });
        }
        let max_downloads = request
            .max_downloads
            .unwrap_or(self.config.default_max_downloads);
        let ttl_secs = request.ttl_secs.unwrap_or(self.config.default_ttl_secs);
        if ttl_secs > self.config.max_ttl_secs {
            return Err(ShareError::InvalidRequest(format!(
                "ttl of {ttl_secs}s exceeds the maximum of {}s",
                self.config.max_ttl_secs
            )));
        }

        let id = RecordId::generate();
        // Validate everything up front; the real record is rebuilt once the
        // stored size is known.
        ShareRecord::new(id.clone(), &request, max_downloads, ttl_secs, 0, Utc::now())?;

        let expected = request.declared_size.saturating_add(TAG_SIZE as u64);
        let tolerance = self.config.size_tolerance_bytes;
        let stored_size = self
            .blobs
            .write_from(
                id.as_str(),
                source,
                expected.saturating_add(tolerance),
                self.config.chunk_size,
            )
            .await
            .map_err(|e| match e {
                ShareError::PayloadTooLarge { size, .. } => ShareError::CorruptUpload {
                    expected,
                    actual: size,
                },
                other => other,
            })?;

        if stored_size.saturating_add(tolerance) < expected {
            self.discard_blob(&id).await;
            return Err(ShareError::CorruptUpload {
                expected,
                actual: stored_size,
            });
        }

        let stored = ShareRecord::new(
            id.clone(),
            &request,
            max_downloads,
            ttl_secs,
            stored_size,
            Utc::now(),
        )
        .and_then(|record| self.records.insert(&record));
        if let Err(e) = stored {
            self.discard_blob(&id).await;
            return Err(e);
        }

        info!(
            record_id = %id,
            stored_size,
            max_downloads,
            ttl_secs,
            "share created"
        );
        Ok(CreateShareResponse { record_id: id })
    }

    /// Returns the public metadata of a retrievable record. Never counts a
    /// download.
    pub fn metadata(&self, id: &str) -> ShareResult<FileMetadata> {
        let record = self.load(&RecordId::parse(id)?)?;
        record.check_retrievable(Utc::now())?;
        Ok(FileMetadata::from(&record))
    }

    /// Reserves a download slot and opens the ciphertext for reading.
    ///
    /// Gating failures are reported as `NotFound`, `Expired` or
    /// `LimitReached`, checked in that order.
    pub async fn begin_retrieval(&self, id: &str) -> ShareResult<Retrieval> {
        let id = RecordId::parse(id)?;
        let lease_id = self
            .records
            .reserve_download(&id, Utc::now(), self.lease_timeout())?;
        let lease = DownloadLease {
            records: self.records.clone(),
            lease_id,
            record_id: id,
            timeout: self.lease_timeout(),
            renew_every: self.renew_interval(),
            renewed_at: Instant::now(),
            settled: false,
        };
        debug!(record_id = %lease.record_id, "download slot reserved");

        let record = self.load(&lease.record_id)?;
        let (file, size) = self.blobs.open_read(&record.ciphertext_ref).await?;
        if size != record.stored_size {
            return Err(ShareError::Storage(format!(
                "ciphertext for {} is {size} bytes, expected {}",
                record.id, record.stored_size
            )));
        }

        Ok(Retrieval {
            record,
            file,
            size,
            bytes_read: 0,
            lease,
        })
    }

    /// Streams the ciphertext of `id` into `sink` and counts the download
    /// once every byte has been written and flushed.
    pub async fn retrieve<W>(&self, id: &str, sink: &mut W) -> ShareResult<RetrievalReceipt>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut retrieval = self.begin_retrieval(id).await?;
        let mut buf = vec![0u8; self.config.chunk_size];

        loop {
            let n = retrieval.read_chunk(&mut buf).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])
                .await
                .map_err(|e| ShareError::Transfer(e.to_string()))?;
        }
        sink.flush()
            .await
            .map_err(|e| ShareError::Transfer(e.to_string()))?;

        retrieval.finish()
    }

    /// Deletes a record, its leases and its ciphertext. Returns whether
    /// anything was deleted; unknown or malformed ids are a no-op.
    pub async fn delete(&self, id: &str) -> ShareResult<bool> {
        let Ok(id) = RecordId::parse(id) else {
            return Ok(false);
        };
        let Some(record) = self.records.delete(&id)? else {
            return Ok(false);
        };
        self.blobs.delete(&record.ciphertext_ref).await?;
        info!(record_id = %id, "share deleted");
        Ok(true)
    }

    /// Removes every record expired at `now` along with its ciphertext,
    /// reaps stale leases, and deletes abandoned partial uploads and blobs
    /// that have no record.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> ShareResult<SweepReport> {
        let mut report = SweepReport::default();

        for id in self.records.expired_ids(now)? {
            let Some(record) = self.records.delete(&id)? else {
                continue;
            };
            if let Err(e) = self.blobs.delete(&record.ciphertext_ref).await {
                warn!("failed to delete ciphertext for expired record {id}: {e}");
            }
            report.records_removed += 1;
        }

        report.leases_reaped = self
            .records
            .reap_stale_leases(now, self.lease_timeout())?;
        report.partial_uploads_removed = self
            .blobs
            .remove_stale_parts(self.abandon_after())
            .await?;
        report.orphan_blobs_removed = self.remove_orphan_blobs().await?;

        if report != SweepReport::default() {
            info!(
                records_removed = report.records_removed,
                leases_reaped = report.leases_reaped,
                partial_uploads_removed = report.partial_uploads_removed,
                orphan_blobs_removed = report.orphan_blobs_removed,
                "sweep finished"
            );
        }
        Ok(report)
    }

    /// Deletes complete blobs with no record. Only blobs older than the
    /// lease timeout are considered, so an upload between rename and
    /// record insert is left alone.
    async fn remove_orphan_blobs(&self) -> ShareResult<usize> {
        let mut removed = 0;
        for key in self.blobs.keys_older_than(self.abandon_after()).await? {
            let orphaned = match RecordId::parse(&key) {
                Ok(id) => self.records.get(&id)?.is_none(),
                Err(_) => true,
            };
            if orphaned && self.blobs.delete(&key).await? {
                warn!("removed ciphertext {key} with no share record");
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn load(&self, id: &RecordId) -> ShareResult<ShareRecord> {
        self.records.get(id)?.ok_or(ShareError::NotFound)
    }

    fn lease_timeout(&self) -> Duration {
        i64::try_from(self.config.lease_timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// Age after which an unfinished upload or unreferenced blob is garbage.
    fn abandon_after(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.lease_timeout_secs)
    }

    /// Active transfers renew their lease twice per timeout.
    fn renew_interval(&self) -> std::time::Duration {
        self.abandon_after() / 2
    }

    async fn discard_blob(&self, id: &RecordId) {
        if let Err(e) = self.blobs.delete(id.as_str()).await {
            warn!("failed to discard ciphertext for rejected upload {id}: {e}");
        }
    }
}

// ============================================================================
// Retrieval
// ============================================================================

/// An in-progress download holding a reserved slot.
///
/// Read the ciphertext with [`read_chunk`](Self::read_chunk) until it
/// returns 0, then call [`finish`](Self::finish) to count the download.
pub struct Retrieval {
    record: ShareRecord,
    file: File,
    size: u64,
    bytes_read: u64,
    lease: DownloadLease,
}

impl Retrieval {
    pub fn record(&self) -> &ShareRecord {
        &self.record
    }

    /// Ciphertext length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn metadata(&self) -> FileMetadata {
        FileMetadata::from(&self.record)
    }

    /// Reads the next chunk of ciphertext; 0 means the end was reached.
    ///
    /// Renews the download lease while the transfer makes progress. Fails
    /// with `Transfer` if the transfer stalled long enough to lose its slot.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> ShareResult<usize> {
        self.lease.renew_if_due()?;
        let n = self.file.read(buf).await?;
        self.bytes_read += n as u64;
        Ok(n)
    }

    /// Counts the download. Fails with `Transfer` unless the whole
    /// ciphertext was read.
    pub fn finish(self) -> ShareResult<RetrievalReceipt> {
        if self.bytes_read != self.size {
            return Err(ShareError::Transfer(format!(
                "read {} of {} bytes",
                self.bytes_read, self.size
            )));
        }
        let downloads_remaining = self.lease.commit()?;
        info!(
            record_id = %self.record.id,
            downloads_remaining,
            "download counted"
        );
        Ok(RetrievalReceipt {
            record_id: self.record.id,
            bytes_sent: self.bytes_read,
            downloads_remaining,
        })
    }
}

/// A reserved download slot. Released on drop unless committed.
struct DownloadLease {
    records: RecordStore,
    lease_id: String,
    record_id: RecordId,
    timeout: Duration,
    renew_every: std::time::Duration,
    renewed_at: Instant,
    settled: bool,
}

impl DownloadLease {
    fn renew_if_due(&mut self) -> ShareResult<()> {
        if self.renewed_at.elapsed() < self.renew_every {
            return Ok(());
        }
        if !self
            .records
            .touch_lease(&self.lease_id, Utc::now(), self.timeout)?
        {
            return Err(ShareError::Transfer(format!(
                "download of {} stalled past the lease timeout",
                self.record_id
            )));
        }
        self.renewed_at = Instant::now();
        Ok(())
    }

    fn commit(mut self) -> ShareResult<u32> {
        let remaining = self
            .records
            .commit_download(&self.lease_id, &self.record_id)?;
        self.settled = true;
        Ok(remaining)
    }
}

impl Drop for DownloadLease {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match self.records.release_download(&self.lease_id) {
            Ok(_) => debug!(record_id = %self.record_id, "download slot released"),
            Err(e) => warn!(
                "failed to release download slot for {}: {e}",
                self.record_id
            ),
        }
    }
}
