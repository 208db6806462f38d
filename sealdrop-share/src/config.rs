//! Share service configuration.

use crate::error::{ShareError, ShareResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const ENV_PREFIX: &str = "SEALDROP_";

/// Configuration for the share record lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Directory holding the record database and the `blobs/` directory.
    pub storage_dir: PathBuf,

    /// Record database file name, relative to `storage_dir`.
    pub database_file: String,

    /// Largest plaintext size a sender may declare.
    pub max_upload_bytes: u64,

    /// Download limit applied when a request doesn't set one.
    pub default_max_downloads: u32,

    /// Lifetime applied when a request doesn't set one (seconds).
    pub default_ttl_secs: u64,

    /// Longest lifetime a request may ask for (seconds).
    pub max_ttl_secs: u64,

    /// Allowed distance between the stored ciphertext size and
    /// `declared_size + TAG_SIZE`.
    pub size_tolerance_bytes: u64,

    /// Buffer size for streaming ciphertext in and out.
    pub chunk_size: usize,

    /// How long an in-flight download holds its slot before it is
    /// considered abandoned (seconds).
    pub lease_timeout_secs: u64,

    /// Interval between background sweeps (seconds).
    pub sweep_interval_secs: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("uploads"),
            database_file: "records.sqlite3".to_string(),
            max_upload_bytes: 100 * 1024 * 1024, // 100MB
            default_max_downloads: 1,
            default_ttl_secs: 7 * 24 * 60 * 60, // 7 days
            max_ttl_secs: 30 * 24 * 60 * 60,
            size_tolerance_bytes: 48,
            chunk_size: 64 * 1024,
            lease_timeout_secs: 15 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl ShareConfig {
    /// Default configuration rooted at `dir`.
    pub fn for_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `SEALDROP_*` environment variables.
    ///
    /// Recognized: `STORAGE_DIR`, `DATABASE_FILE`, `MAX_UPLOAD_BYTES`,
    /// `DEFAULT_MAX_DOWNLOADS`, `DEFAULT_TTL_SECS`, `MAX_TTL_SECS`,
    /// `SIZE_TOLERANCE_BYTES`, `CHUNK_SIZE`, `LEASE_TIMEOUT_SECS`,
    /// `SWEEP_INTERVAL_SECS`.
    pub fn from_env() -> ShareResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ShareResult<Self> {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(dir) = var("STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(file) = var("DATABASE_FILE") {
            config.database_file = file;
        }
        parse_into(&var, "MAX_UPLOAD_BYTES", &mut config.max_upload_bytes)?;
        parse_into(&var, "DEFAULT_MAX_DOWNLOADS", &mut config.default_max_downloads)?;
        parse_into(&var, "DEFAULT_TTL_SECS", &mut config.default_ttl_secs)?;
        parse_into(&var, "MAX_TTL_SECS", &mut config.max_ttl_secs)?;
        parse_into(&var, "SIZE_TOLERANCE_BYTES", &mut config.size_tolerance_bytes)?;
        parse_into(&var, "CHUNK_SIZE", &mut config.chunk_size)?;
        parse_into(&var, "LEASE_TIMEOUT_SECS", &mut config.lease_timeout_secs)?;
        parse_into(&var, "SWEEP_INTERVAL_SECS", &mut config.sweep_interval_secs)?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the lifecycle can't operate with.
    pub fn validate(&self) -> ShareResult<()> {
        if self.database_file.is_empty() {
            return Err(ShareError::Config("database_file must not be empty".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(ShareError::Config("max_upload_bytes must be positive".into()));
        }
        if self.default_max_downloads == 0 {
            return Err(ShareError::Config("default_max_downloads must be positive".into()));
        }
        if self.default_ttl_secs > self.max_ttl_secs {
            return Err(ShareError::Config(
                "default_ttl_secs must not exceed max_ttl_secs".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ShareError::Config("chunk_size must be positive".into()));
        }
        if self.lease_timeout_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(ShareError::Config(
                "lease_timeout_secs and sweep_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.storage_dir.join("blobs")
    }
}

fn parse_into<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) -> ShareResult<()> {
    if let Some(raw) = var(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ShareError::Config(format!("{ENV_PREFIX}{name}: invalid value {raw:?}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        ShareConfig::default().validate().unwrap();
    }

    #[test]
    fn env_overrides_defaults() {
        let config = ShareConfig::from_lookup(lookup(&[
            ("SEALDROP_STORAGE_DIR", "/var/lib/sealdrop"),
            ("SEALDROP_MAX_UPLOAD_BYTES", "1024"),
            ("SEALDROP_DEFAULT_MAX_DOWNLOADS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/sealdrop"));
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.default_max_downloads, 3);
        assert_eq!(config.default_ttl_secs, 604_800);
    }

    #[test]
    fn unparsable_env_value_rejected() {
        let err = ShareConfig::from_lookup(lookup(&[("SEALDROP_CHUNK_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("SEALDROP_CHUNK_SIZE"));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let err = ShareConfig::from_lookup(lookup(&[("SEALDROP_CHUNK_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ShareError::Config(_)));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: ShareConfig = serde_json::from_str(r#"{"max_upload_bytes": 10}"#).unwrap();
        assert_eq!(config.max_upload_bytes, 10);
        assert_eq!(config.chunk_size, 64 * 1024);
    }
}
