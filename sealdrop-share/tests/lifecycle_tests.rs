mod support;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use sealdrop_crypto::{decrypt_file, encoding, encrypt_file, CryptoError, TAG_SIZE};
use sealdrop_share::{RecordId, ShareConfig, ShareError, ShareService};
use support::*;

// ── End to end ──────────────────────────────────────────────────

#[tokio::test]
async fn hello_correct_horse_round_trip() {
    let (_dir, service) = service().await;
    let sealed = encrypt_file(b"hello", "correct-horse").unwrap();
    assert_eq!(sealed.ciphertext.len(), 5 + TAG_SIZE);

    let mut req = request(5);
    req.filename = "hello.txt".into();
    req.iv = sealed.iv.clone();
    req.salt = sealed.salt.clone();
    let id = service
        .create(req, &mut sealed.ciphertext.as_slice())
        .await
        .unwrap()
        .record_id;

    let meta = service.metadata(id.as_str()).unwrap();
    assert_eq!(meta.filename, "hello.txt");
    assert_eq!(meta.size, 5);
    assert_eq!(meta.downloads_remaining, 1);

    let mut received = Vec::new();
    let receipt = service.retrieve(id.as_str(), &mut received).await.unwrap();
    assert_eq!(receipt.bytes_sent, 21);
    assert_eq!(receipt.downloads_remaining, 0);

    let plaintext = decrypt_file(&received, "correct-horse", &meta.iv, &meta.salt).unwrap();
    assert_eq!(plaintext, b"hello");
    assert!(matches!(
        decrypt_file(&received, "wrong-horse", &meta.iv, &meta.salt),
        Err(CryptoError::Authentication)
    ));

    // Default limit of one download is now spent.
    let err = service.retrieve(id.as_str(), &mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, ShareError::LimitReached));
}

#[tokio::test]
async fn url_safe_unpadded_metadata_accepted() {
    let (_dir, service) = service().await;
    let sealed = encrypt_file(b"payload", "pw").unwrap();

    let mut req = request(7);
    req.iv = to_url_safe_unpadded(&sealed.iv);
    req.salt = to_url_safe_unpadded(&sealed.salt);
    let id = service
        .create(req, &mut sealed.ciphertext.as_slice())
        .await
        .unwrap()
        .record_id;

    // Stored canonically; decrypts with what metadata hands back.
    let meta = service.metadata(id.as_str()).unwrap();
    assert_eq!(meta.iv, sealed.iv);
    let mut received = Vec::new();
    service.retrieve(id.as_str(), &mut received).await.unwrap();
    assert_eq!(decrypt_file(&received, "pw", &meta.iv, &meta.salt).unwrap(), b"payload");
}

fn to_url_safe_unpadded(b64: &str) -> String {
    let bytes = encoding::decode(b64).unwrap();
    encoding::encode_url_safe(&bytes).trim_end_matches('=').to_string()
}

// ── Defaults and metadata ───────────────────────────────────────

#[tokio::test]
async fn defaults_applied_from_config() {
    let (_dir, service) = service_with(|c| c.default_max_downloads = 3).await;
    let body = fake_ciphertext(10);
    let id = service
        .create(request(10), &mut body.as_slice())
        .await
        .unwrap()
        .record_id;

    let meta = service.metadata(id.as_str()).unwrap();
    assert_eq!(meta.max_downloads, 3);
    assert_eq!(meta.download_count, 0);
    let ttl = meta.expires_at - Utc::now();
    assert!(ttl > Duration::days(6) && ttl <= Duration::days(7));
}

#[tokio::test]
async fn metadata_does_not_count() {
    let (_dir, service) = service().await;
    let id = upload(&service, 10, 1, 60).await;

    for _ in 0..5 {
        service.metadata(id.as_str()).unwrap();
    }
    service.retrieve(id.as_str(), &mut Vec::new()).await.unwrap();
}

#[tokio::test]
async fn exhausted_record_reports_limit_on_metadata() {
    let (_dir, service) = service().await;
    let id = upload(&service, 10, 1, 60).await;
    service.retrieve(id.as_str(), &mut Vec::new()).await.unwrap();

    assert!(matches!(service.metadata(id.as_str()), Err(ShareError::LimitReached)));
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let service = ShareService::open(ShareConfig::for_dir(dir.path())).await.unwrap();
        upload(&service, 32, 2, 60).await
    };

    let service = ShareService::open(ShareConfig::for_dir(dir.path())).await.unwrap();
    let meta = service.metadata(id.as_str()).unwrap();
    assert_eq!(meta.size, 32);
    let mut received = Vec::new();
    service.retrieve(id.as_str(), &mut received).await.unwrap();
    assert_eq!(received, fake_ciphertext(32));
}

// ── Gating ──────────────────────────────────────────────────────

#[tokio::test]
async fn two_downloads_then_limit() {
    let (_dir, service) = service().await;
    let id = upload(&service, 100, 2, 60).await;

    let first = service.retrieve(id.as_str(), &mut Vec::new()).await.unwrap();
    let second = service.retrieve(id.as_str(), &mut Vec::new()).await.unwrap();
    assert_eq!(first.downloads_remaining, 1);
    assert_eq!(second.downloads_remaining, 0);

    let err = service.retrieve(id.as_str(), &mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, ShareError::LimitReached));
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn zero_ttl_is_expired_everywhere() {
    let (_dir, service) = service().await;
    let id = upload(&service, 10, 1, 0).await;

    assert!(matches!(service.metadata(id.as_str()), Err(ShareError::Expired)));
    let err = service.retrieve(id.as_str(), &mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, ShareError::Expired));
    assert_eq!(err.status_code(), 410);
}

#[tokio::test]
async fn unknown_and_path_like_ids_not_found() {
    let (_dir, service) = service().await;
    let unknown = RecordId::generate();

    for id in [unknown.as_str(), "../../etc/passwd", "records.sqlite3", ""] {
        assert!(matches!(service.metadata(id), Err(ShareError::NotFound)));
        let err = service.retrieve(id, &mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, ShareError::NotFound));
    }
}

// ── Upload validation ───────────────────────────────────────────

#[tokio::test]
async fn declared_size_over_limit_rejected() {
    let (_dir, service) = service_with(|c| c.max_upload_bytes = 1024).await;
    let body = fake_ciphertext(2000);

    let err = service
        .create(request(2000), &mut body.as_slice())
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::PayloadTooLarge { size: 2000, max: 1024 }));
    assert_eq!(err.status_code(), 413);
    assert!(blob_files(&service).is_empty());
}

#[tokio::test]
async fn short_upload_is_corrupt() {
    let (_dir, service) = service().await;

    let err = service
        .create(request(100), &mut &[0u8; 10][..])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ShareError::CorruptUpload { expected: 116, actual: 10 }
    ));
    assert!(blob_files(&service).is_empty());
}

#[tokio::test]
async fn oversized_stream_is_corrupt() {
    let (_dir, service) = service().await;
    let body = vec![0u8; 100 + TAG_SIZE + 49];

    let err = service
        .create(request(100), &mut body.as_slice())
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::CorruptUpload { expected: 116, .. }));
    assert!(blob_files(&service).is_empty());
}

#[tokio::test]
async fn prepended_iv_and_salt_within_tolerance() {
    let (_dir, service) = service().await;
    // Some producers prefix the 12-byte IV and 16-byte salt.
    let body = vec![0u8; 100 + TAG_SIZE + 28];

    let id = service
        .create(request(100), &mut body.as_slice())
        .await
        .unwrap()
        .record_id;
    let receipt = service.retrieve(id.as_str(), &mut Vec::new()).await.unwrap();
    assert_eq!(receipt.bytes_sent, 144);
}

#[tokio::test]
async fn malformed_iv_rejected_before_upload() {
    let (_dir, service) = service().await;
    let body = fake_ciphertext(10);

    for iv in ["not base64!!", encoding::encode(&[0u8; 16]).as_str()] {
        let mut req = request(10);
        req.iv = iv.to_string();
        let err = service.create(req, &mut body.as_slice()).await.unwrap_err();
        assert!(matches!(err, ShareError::Encoding(_)), "{iv}: {err}");
        assert_eq!(err.status_code(), 422);
    }
    assert!(blob_files(&service).is_empty());
}

#[tokio::test]
async fn invalid_limits_rejected() {
    let (_dir, service) = service().await;
    let body = fake_ciphertext(10);

    let mut zero_downloads = request(10);
    zero_downloads.max_downloads = Some(0);
    let err = service
        .create(zero_downloads, &mut body.as_slice())
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::InvalidRequest(_)));

    let mut long_ttl = request(10);
    long_ttl.ttl_secs = Some(service.config().max_ttl_secs + 1);
    let err = service.create(long_ttl, &mut body.as_slice()).await.unwrap_err();
    assert!(matches!(err, ShareError::InvalidRequest(_)));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn interrupted_upload_leaves_nothing() {
    let (_dir, service) = service().await;
    let mut source = FailingSource::new(vec![0u8; 50]);

    let err = service.create(request(100), &mut source).await.unwrap_err();
    assert!(matches!(err, ShareError::Transfer(_)));
    assert!(err.is_retryable());
    assert!(blob_files(&service).is_empty());
}

#[tokio::test]
async fn huge_size_tolerance_saturates() {
    let (_dir, service) = service_with(|c| c.size_tolerance_bytes = u64::MAX).await;
    let id = upload(&service, 10, 1, 60).await;

    let receipt = service.retrieve(id.as_str(), &mut Vec::new()).await.unwrap();
    assert_eq!(receipt.bytes_sent, 10 + TAG_SIZE as u64);
}

// ── Delete and sweep ────────────────────────────────────────────

#[tokio::test]
async fn delete_is_idempotent() {
    let (_dir, service) = service().await;
    let id = upload(&service, 10, 1, 60).await;
    assert_eq!(blob_files(&service), vec![id.to_string()]);

    assert!(service.delete(id.as_str()).await.unwrap());
    assert!(!service.delete(id.as_str()).await.unwrap());
    assert!(!service.delete("../../etc/passwd").await.unwrap());

    assert!(matches!(service.metadata(id.as_str()), Err(ShareError::NotFound)));
    assert!(blob_files(&service).is_empty());
}

#[tokio::test]
async fn sweep_removes_only_expired() {
    let (_dir, service) = service().await;
    let expired = upload(&service, 10, 1, 0).await;
    let live = upload(&service, 10, 1, 3600).await;

    let report = service.sweep_expired(Utc::now()).await.unwrap();
    assert_eq!(report.records_removed, 1);
    assert!(matches!(service.metadata(expired.as_str()), Err(ShareError::NotFound)));
    assert_eq!(blob_files(&service), vec![live.to_string()]);

    // Same record is swept once its expiry is reached.
    let later = Utc::now() + Duration::hours(2);
    assert_eq!(service.sweep_expired(later).await.unwrap().records_removed, 1);
    assert!(blob_files(&service).is_empty());
}

#[tokio::test]
async fn sweep_clears_abandoned_partial_uploads() {
    let (_dir, service) = service_with(|c| c.lease_timeout_secs = 1).await;
    let part = service.config().blob_dir().join("deadbeef.part");
    std::fs::write(&part, b"half an upload").unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let report = service.sweep_expired(Utc::now()).await.unwrap();
    assert_eq!(report.partial_uploads_removed, 1);
    assert!(!part.exists());
}

#[tokio::test]
async fn sweep_removes_orphan_blobs() {
    let (_dir, service) = service_with(|c| c.lease_timeout_secs = 1).await;
    let live = upload(&service, 10, 1, 3600).await;
    let orphan = service.config().blob_dir().join(RecordId::generate().as_str());
    std::fs::write(&orphan, fake_ciphertext(10)).unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let report = service.sweep_expired(Utc::now()).await.unwrap();
    assert_eq!(report.orphan_blobs_removed, 1);
    assert_eq!(report.records_removed, 0);
    assert_eq!(blob_files(&service), vec![live.to_string()]);
    service.retrieve(live.as_str(), &mut Vec::new()).await.unwrap();
}

#[tokio::test]
async fn fresh_orphan_blob_survives_sweep() {
    let (_dir, service) = service().await;
    let orphan = service.config().blob_dir().join(RecordId::generate().as_str());
    std::fs::write(&orphan, fake_ciphertext(10)).unwrap();

    let report = service.sweep_expired(Utc::now()).await.unwrap();
    assert_eq!(report.orphan_blobs_removed, 0);
    assert!(orphan.exists());
}
