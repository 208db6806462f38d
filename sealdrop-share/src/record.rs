//! The share record and its gating predicate.

use crate::error::{ShareError, ShareResult};
use crate::types::CreateShare;
use chrono::{DateTime, Duration, Utc};
use sealdrop_crypto::{Iv, Salt};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const MAX_FILENAME_BYTES: usize = 255;
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Opaque external handle for a share: 32 lowercase hex characters.
///
/// Only ids produced by [`RecordId::generate`] or accepted by
/// [`RecordId::parse`] exist, so an id is always safe to use as a file name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Generates a fresh random id (128 bits, 122 of them random).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parses an externally supplied id. Anything malformed is reported as
    /// `NotFound`, the same as an id that was never issued.
    pub fn parse(raw: &str) -> ShareResult<Self> {
        let raw = raw.trim();
        if raw.len() == 32 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(raw.to_ascii_lowercase()))
        } else {
            Err(ShareError::NotFound)
        }
    }

    /// Wraps an id read back from the record store, which only holds ids
    /// that were validated on the way in.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RecordId {
    type Error = ShareError;

    fn try_from(value: String) -> ShareResult<Self> {
        Self::parse(&value)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// Retrievability of a record at a given instant. Only `Active` records may
/// be read; the other states are computed, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareState {
    Active,
    Expired,
    Exhausted,
}

/// Durable metadata for one uploaded ciphertext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: RecordId,
    /// Blob store key of the ciphertext.
    pub ciphertext_ref: String,
    pub filename: String,
    pub mime_type: String,
    pub declared_size: u64,
    pub stored_size: u64,
    pub iv: String,
    pub salt: String,
    pub max_downloads: u32,
    pub download_count: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ShareRecord {
    /// Builds a new record, validating every field.
    ///
    /// IV and salt are re-encoded in the canonical padded standard alphabet.
    pub fn new(
        id: RecordId,
        request: &CreateShare,
        max_downloads: u32,
        ttl_secs: u64,
        stored_size: u64,
        created_at: DateTime<Utc>,
    ) -> ShareResult<Self> {
        let filename = validate_filename(&request.filename)?;
        let mime_type = match request.mime_type.trim() {
            "" => DEFAULT_MIME_TYPE.to_string(),
            m => m.to_string(),
        };
        if max_downloads == 0 {
            return Err(ShareError::InvalidRequest(
                "max_downloads must be at least 1".into(),
            ));
        }
        let iv = Iv::from_base64(&request.iv)?;
        let salt = Salt::from_base64(&request.salt)?;
        let expires_at = expiry_from(created_at, ttl_secs)?;

        Ok(Self {
            ciphertext_ref: id.as_str().to_string(),
            id,
            filename,
            mime_type,
            declared_size: request.declared_size,
            stored_size,
            iv: iv.to_base64(),
            salt: salt.to_base64(),
            max_downloads,
            download_count: 0,
            created_at,
            expires_at,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn state(&self, now: DateTime<Utc>) -> ShareState {
        if self.is_expired(now) {
            ShareState::Expired
        } else if self.download_count >= self.max_downloads {
            ShareState::Exhausted
        } else {
            ShareState::Active
        }
    }

    /// `Ok` iff the record may be read at `now`; otherwise the gating error.
    pub fn check_retrievable(&self, now: DateTime<Utc>) -> ShareResult<()> {
        match self.state(now) {
            ShareState::Active => Ok(()),
            ShareState::Expired => Err(ShareError::Expired),
            ShareState::Exhausted => Err(ShareError::LimitReached),
        }
    }

    pub fn downloads_remaining(&self) -> u32 {
        self.max_downloads.saturating_sub(self.download_count)
    }
}

fn validate_filename(raw: &str) -> ShareResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ShareError::InvalidRequest("filename must not be empty".into()));
    }
    if name.len() > MAX_FILENAME_BYTES {
        return Err(ShareError::InvalidRequest(format!(
            "filename longer than {MAX_FILENAME_BYTES} bytes"
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(ShareError::InvalidRequest(
            "filename contains control characters".into(),
        ));
    }
    Ok(name.to_string())
}

pub(crate) fn expiry_from(created_at: DateTime<Utc>, ttl_secs: u64) -> ShareResult<DateTime<Utc>> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| created_at.checked_add_signed(ttl))
        .ok_or_else(|| ShareError::InvalidRequest(format!("ttl of {ttl_secs}s is out of range")))
}
