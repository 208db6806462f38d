//! Shared helpers for share lifecycle integration tests.

#![allow(dead_code)]

use sealdrop_crypto::{encoding, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
use sealdrop_share::{CreateShare, RecordId, ShareConfig, ShareService};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing_subscriber::EnvFilter;

/// A service rooted in a fresh temporary directory.
pub async fn service() -> (TempDir, ShareService) {
    service_with(|_| {}).await
}

pub async fn service_with(tweak: impl FnOnce(&mut ShareConfig)) -> (TempDir, ShareService) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = ShareConfig::for_dir(dir.path());
    tweak(&mut config);
    let service = ShareService::open(config).await.unwrap();
    (dir, service)
}

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Request metadata for `plaintext_len` bytes with fixed, valid IV and salt.
pub fn request(plaintext_len: u64) -> CreateShare {
    CreateShare {
        filename: "notes.txt".into(),
        mime_type: "text/plain".into(),
        declared_size: plaintext_len,
        iv: encoding::encode(&[0x11; NONCE_SIZE]),
        salt: encoding::encode(&[0x22; SALT_SIZE]),
        max_downloads: None,
        ttl_secs: None,
    }
}

/// Bytes shaped like the ciphertext of a `plaintext_len` byte file.
pub fn fake_ciphertext(plaintext_len: usize) -> Vec<u8> {
    (0..plaintext_len + TAG_SIZE).map(|i| (i % 251) as u8).collect()
}

/// Uploads a fake ciphertext and returns its id.
pub async fn upload(
    service: &ShareService,
    plaintext_len: usize,
    max_downloads: u32,
    ttl_secs: u64,
) -> RecordId {
    let mut req = request(plaintext_len as u64);
    req.max_downloads = Some(max_downloads);
    req.ttl_secs = Some(ttl_secs);
    let body = fake_ciphertext(plaintext_len);
    service
        .create(req, &mut body.as_slice())
        .await
        .unwrap()
        .record_id
}

/// Names of the files currently in the blob directory.
pub fn blob_files(service: &ShareService) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(service.config().blob_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Sink that accepts `capacity` bytes and then fails every write.
pub struct FailingSink {
    pub received: Vec<u8>,
    capacity: usize,
}

impl FailingSink {
    pub fn after(capacity: usize) -> Self {
        Self {
            received: Vec::new(),
            capacity,
        }
    }
}

impl AsyncWrite for FailingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let room = self.capacity - self.received.len();
        if room == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "recipient went away",
            )));
        }
        let n = room.min(buf.len());
        self.received.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Sink that never makes progress.
pub struct StalledSink;

impl AsyncWrite for StalledSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Pending
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

/// Source that yields `data` and then fails instead of reaching EOF.
pub struct FailingSource {
    data: Vec<u8>,
    pos: usize,
}

impl FailingSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl AsyncRead for FailingSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos >= self.data.len() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "sender went away",
            )));
        }
        let n = buf.remaining().min(self.data.len() - self.pos);
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}
