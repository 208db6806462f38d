//! File-backed storage for opaque ciphertext blobs.
//!
//! Blobs live at `<root>/<key>`. Writes go to `<key>.part`, are synced, and
//! only then renamed into place, so a visible blob is always complete.

use crate::error::{ShareError, ShareResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

const PART_SUFFIX: &str = ".part";

// ============================================================================
// BlobStore
// ============================================================================

#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens the store, creating `root` if needed.
    pub async fn open(root: impl Into<PathBuf>) -> ShareResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn part_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{PART_SUFFIX}"))
    }

    /// Streams `source` into the blob `key` and returns the bytes written.
    ///
    /// Fails with `PayloadTooLarge` as soon as more than `limit` bytes have
    /// arrived. Read errors on `source` are `Transfer`; write errors are
    /// `Storage`. On any failure the partial file is removed.
    pub async fn write_from<R>(
        &self,
        key: &str,
        source: &mut R,
        limit: u64,
        chunk_size: usize,
    ) -> ShareResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let part = self.part_path(key);
        let result = async {
            let written = stream_to_file(&part, source, limit, chunk_size).await?;
            fs::rename(&part, self.blob_path(key)).await?;
            Ok::<_, ShareError>(written)
        }
        .await;

        if result.is_err() {
            remove_if_exists(&part).await;
        }
        result
    }

    /// Opens blob `key` for reading and returns it with its length.
    pub async fn open_read(&self, key: &str) -> ShareResult<(File, u64)> {
        let path = self.blob_path(key);
        let file = File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ShareError::Storage(format!("ciphertext missing for {key}")),
            _ => ShareError::from(e),
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.blob_path(key)).await.unwrap_or(false)
    }

    /// Removes blob `key`. Returns whether a file was removed.
    pub async fn delete(&self, key: &str) -> ShareResult<bool> {
        match fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes `.part` files last modified at least `older_than` ago.
    pub async fn remove_stale_parts(&self, older_than: Duration) -> ShareResult<usize> {
        let mut removed = 0;
        for (name, path) in self.files_older_than(older_than).await? {
            if name.ends_with(PART_SUFFIX) {
                remove_if_exists(&path).await;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "removed abandoned partial uploads");
        }
        Ok(removed)
    }

    /// Keys of complete blobs last modified at least `older_than` ago.
    pub async fn keys_older_than(&self, older_than: Duration) -> ShareResult<Vec<String>> {
        Ok(self
            .files_older_than(older_than)
            .await?
            .into_iter()
            .filter(|(name, _)| !name.ends_with(PART_SUFFIX))
            .map(|(name, _)| name)
            .collect())
    }

    async fn files_older_than(&self, older_than: Duration) -> ShareResult<Vec<(String, PathBuf)>> {
        let now = SystemTime::now();
        let mut aged = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            // Entries removed concurrently are skipped.
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let age = now.duration_since(metadata.modified()?).unwrap_or_default();
            if age >= older_than {
                aged.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
            }
        }
        Ok(aged)
    }
}

async fn stream_to_file<R>(
    path: &Path,
    source: &mut R,
    limit: u64,
    chunk_size: usize,
) -> ShareResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = File::create(path).await?;
    let mut buf = vec![0u8; chunk_size];
    let mut written: u64 = 0;

    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| ShareError::Transfer(e.to_string()))?;
        if n == 0 {
            break;
        }
        written += n as u64;
        if written > limit {
            return Err(ShareError::PayloadTooLarge {
                size: written,
                max: limit,
            });
        }
        file.write_all(&buf[..n]).await?;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), "failed to remove partial blob: {e}");
        }
    }
}
