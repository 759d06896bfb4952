use relay_ingest::{
    Error, FileStatus, Gateway, GatewayConfig, HistoryAction, MemoryMetadataStore, MetadataStore,
    TransferMode, UploadConfig,
};
use relay_store::{MemoryRemoteStore, RemotePath};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    store: Arc<MemoryRemoteStore>,
    meta: Arc<MemoryMetadataStore>,
    gateway: Gateway,
    temp: TempDir,
}

fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp = TempDir::new().unwrap();
    let store = Arc::new(MemoryRemoteStore::new());
    let meta = Arc::new(MemoryMetadataStore::new());
    let config = GatewayConfig {
        upload: UploadConfig {
            chunk_size: 8,
            parallel_chunks: 2,
            chunk_threshold: 64,
            scratch_root: temp.path().to_path_buf(),
        },
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(store.clone(), meta.clone(), config);
    Fixture {
        store,
        meta,
        gateway,
        temp,
    }
}

fn write_source(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::File::create(&path)
        .unwrap()
        .write_all(content)
        .unwrap();
    path
}

#[tokio::test]
async fn upload_creates_directories_file_and_record() {
    let f = fixture();
    let source = write_source(f.temp.path(), "s1", b"hello world");
    let dir = RemotePath::normalize("docs/2026/reports");

    let result = f
        .gateway
        .upload(&dir, &source, "summary.pdf", None, "alice", None)
        .await
        .unwrap();

    assert_eq!(result.file_name, "summary.pdf");
    assert!(!result.renamed);
    assert_eq!(result.report.mode, TransferMode::Single);
    assert_eq!(
        f.store.file_content(&result.path).unwrap(),
        b"hello world"
    );

    let record = f.meta.find_by_path(&result.path).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Active);
    assert_eq!(record.mime_type, "application/pdf");
    assert_eq!(record.size, 11);
    assert_eq!(record.etag.as_deref(), Some(result.etag.as_str()));

    let history = f.meta.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HistoryAction::Upload);
    assert_eq!(history[0].changed_by, "alice");
    assert!(history[0].old_etag.is_none());
}

#[tokio::test]
async fn second_upload_of_same_name_gets_a_suffix() {
    let f = fixture();
    let dir = RemotePath::normalize("docs");
    let a = write_source(f.temp.path(), "s1", b"first");
    let b = write_source(f.temp.path(), "s2", b"second");

    let first = f
        .gateway
        .upload(&dir, &a, "report.pdf", None, "alice", None)
        .await
        .unwrap();
    let second = f
        .gateway
        .upload(&dir, &b, "report.pdf", None, "bob", None)
        .await
        .unwrap();

    assert_eq!(first.file_name, "report.pdf");
    assert_eq!(second.file_name, "report(1).pdf");
    assert!(second.renamed);
    assert_eq!(
        f.store.file_content(&second.path).unwrap(),
        b"second"
    );
}

#[tokio::test]
async fn large_upload_goes_chunked_and_hashes_match() {
    let f = fixture();
    let dir = RemotePath::normalize("big");
    let content: Vec<u8> = (0..100u8).collect();
    let source = write_source(f.temp.path(), "s1", &content);

    let result = f
        .gateway
        .upload(&dir, &source, "blob.bin", None, "alice", None)
        .await
        .unwrap();

    assert_eq!(result.report.mode, TransferMode::Chunked);
    assert_eq!(result.report.chunk_count, Some(13));
    assert_eq!(f.store.file_content(&result.path).unwrap(), content);
    assert!(result.etag.starts_with("v1-"));
    assert!(result.etag.ends_with(&result.content_hash));
}

#[tokio::test]
async fn update_without_if_match_is_refused_with_current_etag() {
    let f = fixture();
    let dir = RemotePath::normalize("docs");
    let original = write_source(f.temp.path(), "s1", b"original");
    let uploaded = f
        .gateway
        .upload(&dir, &original, "a.txt", None, "alice", None)
        .await
        .unwrap();

    let replacement = write_source(f.temp.path(), "s2", b"changed");
    let err = f
        .gateway
        .update(&uploaded.path, &replacement, None, None, "alice")
        .await
        .unwrap_err();

    match err {
        Error::PreconditionRequired { etag } => assert_eq!(etag, uploaded.etag),
        other => panic!("expected PreconditionRequired, got {other:?}"),
    }
    // Nothing was written.
    assert_eq!(
        f.store.file_content(&uploaded.path).unwrap(),
        b"original"
    );
}

#[tokio::test]
async fn update_with_stale_etag_is_refused() {
    let f = fixture();
    let dir = RemotePath::normalize("docs");
    let original = write_source(f.temp.path(), "s1", b"original");
    let uploaded = f
        .gateway
        .upload(&dir, &original, "a.txt", None, "alice", None)
        .await
        .unwrap();

    let replacement = write_source(f.temp.path(), "s2", b"changed");
    let err = f
        .gateway
        .update(
            &uploaded.path,
            &replacement,
            None,
            Some("\"v1-deadbeef\""),
            "alice",
        )
        .await
        .unwrap_err();

    match err {
        Error::PreconditionFailed { etag } => assert_eq!(etag, uploaded.etag),
        other => panic!("expected PreconditionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn update_with_matching_etag_overwrites_and_records_history() {
    let f = fixture();
    let dir = RemotePath::normalize("docs");
    let original = write_source(f.temp.path(), "s1", b"original");
    let uploaded = f
        .gateway
        .upload(&dir, &original, "a.txt", None, "alice", None)
        .await
        .unwrap();

    let replacement = write_source(f.temp.path(), "s2", b"changed");
    let header = format!("\"{}\"", uploaded.etag);
    let result = f
        .gateway
        .update(&uploaded.path, &replacement, None, Some(&header), "bob")
        .await
        .unwrap();

    assert!(result.changed);
    assert_ne!(result.etag, uploaded.etag);
    assert_eq!(f.store.file_content(&uploaded.path).unwrap(), b"changed");

    let record = f.meta.find_by_path(&uploaded.path).await.unwrap().unwrap();
    assert_eq!(record.etag.as_deref(), Some(result.etag.as_str()));
    assert_eq!(record.size, 7);

    let history = f.meta.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, HistoryAction::Update);
    assert_eq!(history[1].old_etag.as_deref(), Some(uploaded.etag.as_str()));
    assert_eq!(history[1].new_etag.as_deref(), Some(result.etag.as_str()));
    assert_eq!(history[1].changed_by, "bob");
}

#[tokio::test]
async fn update_with_identical_content_is_a_no_op() {
    let f = fixture();
    let dir = RemotePath::normalize("docs");
    let original = write_source(f.temp.path(), "s1", b"same bytes");
    let uploaded = f
        .gateway
        .upload(&dir, &original, "a.txt", None, "alice", None)
        .await
        .unwrap();

    let duplicate = write_source(f.temp.path(), "s2", b"same bytes");
    let result = f
        .gateway
        .update(&uploaded.path, &duplicate, None, Some(&uploaded.etag), "alice")
        .await
        .unwrap();

    assert!(!result.changed);
    assert_eq!(result.etag, uploaded.etag);
    // No Update entry was added.
    assert_eq!(f.meta.history().len(), 1);
}

#[tokio::test]
async fn update_with_wrong_mime_type_conflicts() {
    let f = fixture();
    let dir = RemotePath::normalize("docs");
    let original = write_source(f.temp.path(), "s1", b"%PDF");
    let uploaded = f
        .gateway
        .upload(&dir, &original, "a.pdf", None, "alice", None)
        .await
        .unwrap();

    let replacement = write_source(f.temp.path(), "s2", b"plain");
    let err = f
        .gateway
        .update(
            &uploaded.path,
            &replacement,
            Some("text/plain"),
            Some(&uploaded.etag),
            "alice",
        )
        .await
        .unwrap_err();

    match err {
        Error::TypeMismatch { existing, uploaded } => {
            assert_eq!(existing, "application/pdf");
            assert_eq!(uploaded, "text/plain");
        }
        other => panic!("expected TypeMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn update_of_extensionless_file_skips_the_mime_guard() {
    let f = fixture();
    let dir = RemotePath::normalize("docs");
    let original = write_source(f.temp.path(), "s1", b"legacy");
    let uploaded = f
        .gateway
        .upload(&dir, &original, "LEGACYFILE", None, "alice", None)
        .await
        .unwrap();

    // No type can be inferred from the name, so a declared type is let
    // through rather than conflicting with the octet-stream fallback.
    let replacement = write_source(f.temp.path(), "s2", b"replaced");
    let result = f
        .gateway
        .update(
            &uploaded.path,
            &replacement,
            Some("text/plain"),
            Some(&uploaded.etag),
            "alice",
        )
        .await
        .unwrap();

    assert!(result.changed);
    assert_eq!(f.store.file_content(&uploaded.path).unwrap(), b"replaced");
}

#[tokio::test]
async fn update_of_untracked_file_backfills_and_asks_for_retry() {
    let f = fixture();
    let path = RemotePath::normalize("docs/legacy.txt");
    f.store.insert_file(&path, b"pre-existing");

    let replacement = write_source(f.temp.path(), "s1", b"new content");
    let err = f
        .gateway
        .update(&path, &replacement, None, Some("v1-whatever"), "alice")
        .await
        .unwrap_err();

    let fresh_etag = match err {
        Error::PreconditionRequired { etag } => etag,
        other => panic!("expected PreconditionRequired, got {other:?}"),
    };
    // Remote content untouched, record backfilled.
    assert_eq!(f.store.file_content(&path).unwrap(), b"pre-existing");
    let record = f.meta.find_by_path(&path).await.unwrap().unwrap();
    assert_eq!(record.etag.as_deref(), Some(fresh_etag.as_str()));
    assert!(record.content_hash.is_some());

    // Retrying with the fresh tag now succeeds.
    let result = f
        .gateway
        .update(&path, &replacement, None, Some(&fresh_etag), "alice")
        .await
        .unwrap();
    assert!(result.changed);
    assert_eq!(f.store.file_content(&path).unwrap(), b"new content");
}

#[tokio::test]
async fn update_of_missing_file_is_not_found() {
    let f = fixture();
    let replacement = write_source(f.temp.path(), "s1", b"x");
    let err = f
        .gateway
        .update(
            &RemotePath::normalize("docs/absent.txt"),
            &replacement,
            None,
            None,
            "alice",
        )
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn delete_marks_the_record_and_logs_history() {
    let f = fixture();
    let dir = RemotePath::normalize("docs");
    let source = write_source(f.temp.path(), "s1", b"bye");
    let uploaded = f
        .gateway
        .upload(&dir, &source, "a.txt", None, "alice", None)
        .await
        .unwrap();

    f.gateway.delete(&uploaded.path, "bob").await.unwrap();

    assert!(f.store.file_content(&uploaded.path).is_none());
    let record = f.meta.find_by_path(&uploaded.path).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Deleted);

    let history = f.meta.history();
    assert_eq!(history.last().unwrap().action, HistoryAction::Delete);
    assert_eq!(
        history.last().unwrap().old_etag.as_deref(),
        Some(uploaded.etag.as_str())
    );
}

#[tokio::test]
async fn concurrent_uploads_of_same_name_both_land() {
    let f = fixture();
    let dir = RemotePath::normalize("docs");
    let a = write_source(f.temp.path(), "s1", b"one");
    let b = write_source(f.temp.path(), "s2", b"two");

    let (first, second) = tokio::join!(
        f.gateway.upload(&dir, &a, "same.txt", None, "alice", None),
        f.gateway.upload(&dir, &b, "same.txt", None, "bob", None),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    let mut names = vec![first.file_name.clone(), second.file_name.clone()];
    names.sort();
    assert_eq!(names, vec!["same(1).txt", "same.txt"]);
    assert_ne!(first.path, second.path);
}
