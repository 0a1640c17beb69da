use chrono::{Duration, Utc};
use mediacache::{fingerprint, MediaKind, MediaStore, NewHistoryRecord};

const URL: &str = "https://example.com/video.mp4";

async fn store() -> MediaStore {
    MediaStore::open_memory().await.unwrap()
}

#[tokio::test]
async fn test_write_then_read() {
    let cache = store().await.cache(Duration::days(30));

    cache
        .insert_or_replace(URL, "-100:7", MediaKind::Video, "video.mp4", 1234)
        .await
        .unwrap();

    let hit = cache.lookup(URL).await.unwrap().expect("hit");
    assert_eq!(hit.fingerprint, fingerprint(URL));
    assert_eq!(hit.source_url, URL);
    assert_eq!(hit.archive_reference, "-100:7");
    assert_eq!(hit.media_kind, MediaKind::Video);
    assert_eq!(hit.filename, "video.mp4");
    assert_eq!(hit.size_bytes, 1234);
}

#[tokio::test]
async fn test_miss_is_none() {
    let cache = store().await.cache(Duration::days(30));
    assert!(cache.lookup(URL).await.unwrap().is_none());
}

#[tokio::test]
async fn test_last_write_wins() {
    let cache = store().await.cache(Duration::days(30));
    cache.insert_or_replace(URL, "-100:1", MediaKind::Video, "a.mp4", 1).await.unwrap();
    cache.insert_or_replace(URL, "-100:2", MediaKind::Document, "b.bin", 2).await.unwrap();

    let hit = cache.lookup(URL).await.unwrap().unwrap();
    assert_eq!(hit.archive_reference, "-100:2");
    assert_eq!(hit.media_kind, MediaKind::Document);
    assert_eq!(cache.stats().await.unwrap().count, 1);
}

#[tokio::test]
async fn test_expired_entry_is_evicted_on_lookup() {
    let cache = store().await.cache(Duration::days(30));
    cache.insert_or_replace(URL, "-100:1", MediaKind::Video, "a.mp4", 10).await.unwrap();

    let later = Utc::now() + Duration::days(31);
    assert!(cache.lookup_at(URL, later).await.unwrap().is_none());

    // The row is gone, not merely hidden.
    assert_eq!(cache.stats().await.unwrap().count, 0);
    assert!(cache.lookup(URL).await.unwrap().is_none());
}

#[tokio::test]
async fn test_entry_inside_window_survives() {
    let cache = store().await.cache(Duration::days(30));
    cache.insert_or_replace(URL, "-100:1", MediaKind::Video, "a.mp4", 10).await.unwrap();

    let later = Utc::now() + Duration::days(29);
    assert!(cache.lookup_at(URL, later).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_and_stats() {
    let cache = store().await.cache(Duration::days(30));
    cache.insert_or_replace(URL, "r1", MediaKind::Video, "a.mp4", 100).await.unwrap();
    cache
        .insert_or_replace("https://example.com/b", "r2", MediaKind::Audio, "b.m4a", 50)
        .await
        .unwrap();

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.total_size_bytes, 150);

    assert!(cache.delete(URL).await.unwrap());
    assert!(!cache.delete(URL).await.unwrap());
    assert_eq!(cache.stats().await.unwrap().total_size_bytes, 50);
}

#[tokio::test]
async fn test_history_is_bounded_and_newest_first() {
    let history = store().await.history(3);
    for i in 0..5u64 {
        history
            .append(&NewHistoryRecord {
                requester_id: 42,
                source_url: format!("https://example.com/{i}"),
                filename: format!("{i}.mp4"),
                size_bytes: i,
            })
            .await
            .unwrap();
    }
    history
        .append(&NewHistoryRecord {
            requester_id: 7,
            source_url: "https://example.com/x".into(),
            filename: "x.mp4".into(),
            size_bytes: 1,
        })
        .await
        .unwrap();

    let recent = history.recent(42, 10).await.unwrap();
    let names: Vec<_> = recent.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["4.mp4", "3.mp4", "2.mp4"]);

    assert_eq!(history.recent(7, 10).await.unwrap().len(), 1);
    assert_eq!(history.distinct_requesters().await.unwrap(), 2);
}

#[tokio::test]
async fn test_file_backed_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
        let store = MediaStore::open(&path).await.unwrap();
        store
            .cache(Duration::days(30))
            .insert_or_replace(URL, "r", MediaKind::Video, "a.mp4", 5)
            .await
            .unwrap();
    }

    let reopened = MediaStore::open(&path).await.unwrap();
    let hit = reopened.cache(Duration::days(30)).lookup(URL).await.unwrap();
    assert_eq!(hit.map(|h| h.size_bytes), Some(5));
}
