use chrono::{DateTime, TimeZone, Utc};
use job_scout::domain::ports::ListingStore;
use job_scout::{CsvBatchStore, Listing, Source};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

fn listing(title: &str, link: &str, posted_at: DateTime<Utc>) -> Listing {
    Listing {
        title: title.to_string(),
        company: "Acme, Inc.".to_string(),
        link: link.to_string(),
        posted_at,
        source: Source::new("BuiltIn"),
        location: Some("Austin, TX, USA".to_string()),
        is_remote: false,
    }
}

#[test]
fn test_empty_batch_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path().join("jobs"));

    let result = store.write_batch(&[], at(10, 0)).unwrap();

    assert!(result.is_none());
    assert!(store.list_batches().unwrap().is_empty());
}

#[test]
fn test_batch_reads_back_identical_listings() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path());
    let mut remote = listing("Rust Engineer", "https://example.com/jobs/2", at(8, 30));
    remote.location = None;
    remote.is_remote = true;
    let written = vec![listing("Backend Developer", "https://example.com/jobs/1", at(9, 15)), remote];

    let path = store.write_batch(&written, at(10, 0)).unwrap().unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    assert_eq!(name, "jobs_20240301_100000_000.csv");

    let read = CsvBatchStore::read_batch(&path).unwrap();
    assert_eq!(read, written);
}

#[test]
fn test_batches_never_overwrite_each_other() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path());

    let first = store
        .write_batch(&[listing("A", "https://example.com/a", at(9, 0))], at(10, 0))
        .unwrap()
        .unwrap();
    let second = store
        .write_batch(&[listing("B", "https://example.com/b", at(9, 0))], at(10, 0))
        .unwrap()
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(store.list_batches().unwrap().len(), 2);
}

#[test]
fn test_load_recent_prefers_newest_batch_and_sorts_by_posted_time() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path());

    store
        .write_batch(
            &[
                listing("Old Title", "https://example.com/1", at(7, 0)),
                listing("Other", "https://example.com/2", at(6, 0)),
            ],
            at(9, 0),
        )
        .unwrap();
    store
        .write_batch(&[listing("New Title", "https://example.com/1", at(8, 0))], at(10, 0))
        .unwrap();

    let merged = store.load_recent_at(at(11, 0)).unwrap();

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].title, "New Title");
    assert_eq!(merged[1].link, "https://example.com/2");
}

#[test]
fn test_load_recent_skips_malformed_rows_and_unreadable_batches() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path());
    store
        .write_batch(&[listing("Good", "https://example.com/good", at(8, 0))], at(9, 0))
        .unwrap();

    fs::write(
        temp_dir.path().join("jobs_20240301_093000_000.csv"),
        "title,company,link,posted_time,source,location,is_remote\n\
         Broken,Acme,https://example.com/broken,not-a-date,BuiltIn,,False\n\
         Legacy,Acme,https://example.com/legacy,2024-03-01 08:30:00,BuiltIn,,True\n",
    )
    .unwrap();
    // 無法讀取的批次（目錄）只略過
    fs::create_dir(temp_dir.path().join("jobs_20240301_094500_000.csv")).unwrap();
    fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

    let merged = store.load_recent_at(at(10, 0)).unwrap();

    let links: Vec<&str> = merged.iter().map(|l| l.link.as_str()).collect();
    assert_eq!(links, vec!["https://example.com/legacy", "https://example.com/good"]);
    assert!(merged[0].is_remote);
}

#[test]
fn test_load_recent_ignores_batches_outside_window() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path()).with_retention(Duration::from_secs(3600));
    store
        .write_batch(&[listing("Stale", "https://example.com/stale", at(6, 0))], at(7, 0))
        .unwrap();
    store
        .write_batch(&[listing("Fresh", "https://example.com/fresh", at(9, 0))], at(9, 30))
        .unwrap();

    let merged = store.load_recent_at(at(10, 0)).unwrap();

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].title, "Fresh");
}

#[test]
fn test_prune_removes_only_expired_batches() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path());
    store
        .write_batch(&[listing("Old", "https://example.com/old", at(1, 0))], at(1, 0))
        .unwrap();
    store
        .write_batch(&[listing("New", "https://example.com/new", at(9, 0))], at(9, 0))
        .unwrap();

    let removed = store.prune_at(Duration::from_secs(4 * 3600), at(10, 0)).unwrap();

    assert_eq!(removed, 1);
    let remaining = store.list_batches().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].collected_at, at(9, 0));
}

#[test]
fn test_load_latest_returns_newest_batch_only() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path());
    assert!(store.load_latest().unwrap().is_empty());

    store
        .write_batch(&[listing("First", "https://example.com/1", at(8, 0))], at(8, 0))
        .unwrap();
    store
        .write_batch(&[listing("Second", "https://example.com/2", at(9, 0))], at(9, 0))
        .unwrap();

    let latest = store.load_latest().unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].title, "Second");
}

#[tokio::test]
async fn test_store_port_persist_and_seen_keys() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path());
    let fresh = listing("Rust Engineer", "https://example.com/rust", Utc::now());

    let artifact = tokio_test::assert_ok!(store.persist(&[fresh.clone()]).await);
    assert!(artifact.is_some());
    assert!(tokio_test::assert_ok!(store.persist(&[]).await).is_none());

    let keys = store.seen_keys().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys.contains_key(&fresh.key()));
}

#[test]
fn test_seen_keys_carry_their_batch_time() {
    let temp_dir = TempDir::new().unwrap();
    let store = CsvBatchStore::new(temp_dir.path());
    store
        .write_batch(
            &[
                listing("Repeated", "https://example.com/1", at(6, 0)),
                listing("Older Only", "https://example.com/2", at(6, 0)),
            ],
            at(7, 0),
        )
        .unwrap();
    store
        .write_batch(&[listing("Repeated", "https://example.com/1", at(8, 0))], at(9, 0))
        .unwrap();

    let keys = store.seen_keys_at(at(10, 0)).unwrap();

    let repeated = listing("", "https://example.com/1", at(0, 0)).key();
    let older = listing("", "https://example.com/2", at(0, 0)).key();
    assert_eq!(keys[&repeated], at(9, 0));
    assert_eq!(keys[&older], at(7, 0));
}
