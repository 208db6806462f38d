//! Request and response types exchanged with the transport layer.

use crate::record::{RecordId, ShareRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upload metadata sent alongside the ciphertext stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateShare {
    pub filename: String,
    pub mime_type: String,
    /// Plaintext size as declared by the sender.
    pub declared_size: u64,
    /// Base64 IV produced by the sender's cipher engine.
    pub iv: String,
    /// Base64 salt produced by the sender's cipher engine.
    pub salt: String,
    #[serde(default)]
    pub max_downloads: Option<u32>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShareResponse {
    pub record_id: RecordId,
}

/// What a recipient sees before spending a download.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub iv: String,
    pub salt: String,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: u32,
    pub download_count: u32,
    pub downloads_remaining: u32,
}

impl From<&ShareRecord> for FileMetadata {
    fn from(record: &ShareRecord) -> Self {
        Self {
            filename: record.filename.clone(),
            mime_type: record.mime_type.clone(),
            size: record.declared_size,
            iv: record.iv.clone(),
            salt: record.salt.clone(),
            expires_at: record.expires_at,
            max_downloads: record.max_downloads,
            download_count: record.download_count,
            downloads_remaining: record.downloads_remaining(),
        }
    }
}

/// Result of a fully delivered and counted download.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalReceipt {
    pub record_id: RecordId,
    pub bytes_sent: u64,
    pub downloads_remaining: u32,
}

/// Counts from one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub records_removed: usize,
    pub leases_reaped: usize,
    pub partial_uploads_removed: usize,
    /// Complete blobs with no record, left by crashes or failed deletes.
    pub orphan_blobs_removed: usize,
}
