use filetime::FileTime;
use hashmerge::cache::{CacheKey, HashCache, Observation, Side};
use hashmerge::refresh::LocalObserver;
use hashmerge::scanner::{HashAlgorithm, Hasher};
use std::fs;
use tempfile::tempdir;

const NOW: i64 = 1_800_000_000;

fn set_mtime(path: &std::path::Path, secs: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
}

#[test]
fn test_cache_survives_reopen() {
    let cache_dir = tempdir().unwrap();
    let cache_path = cache_dir.path().join("nested/cache.sqlite");
    let key = CacheKey::new("/data", "a/b.txt", HashAlgorithm::Blake3);

    {
        let cache = HashCache::new(&cache_path).unwrap();
        cache.upsert_observation(&Side::Local, &key, 10, 100, NOW).unwrap();
        cache.record_hash(&Side::Local, &key, "abc", NOW).unwrap();
    }

    let cache = HashCache::new(&cache_path).unwrap();
    let record = cache.get(&Side::Local, &key).unwrap().unwrap();
    assert_eq!(record.hash.as_deref(), Some("abc"));
    assert_eq!(record.size, 10);
    assert_eq!(record.last_hashed, Some(NOW));
}

#[test]
fn test_local_and_remote_keys_are_separate() {
    let cache = HashCache::in_memory().unwrap();
    let key = CacheKey::new("/data", "same.txt", HashAlgorithm::Sha256);

    cache.upsert_observation(&Side::Local, &key, 1, 100, NOW).unwrap();
    cache.upsert_observation(&Side::remote("a"), &key, 2, 100, NOW).unwrap();
    cache.upsert_observation(&Side::remote("b"), &key, 3, 100, NOW).unwrap();

    assert_eq!(cache.get(&Side::Local, &key).unwrap().unwrap().size, 1);
    assert_eq!(cache.get(&Side::remote("a"), &key).unwrap().unwrap().size, 2);
    assert_eq!(cache.get(&Side::remote("b"), &key).unwrap().unwrap().size, 3);

    // Same path under another algorithm is another record.
    let blake = CacheKey::new("/data", "same.txt", HashAlgorithm::Blake3);
    assert!(cache.get(&Side::Local, &blake).unwrap().is_none());
}

#[test]
fn test_metadata_change_clears_hash() {
    let cache = HashCache::in_memory().unwrap();
    let side = Side::remote("srv");
    let key = CacheKey::new("/src", "f.bin", HashAlgorithm::Blake3);

    assert_eq!(
        cache.upsert_observation(&side, &key, 5, 100, NOW).unwrap(),
        Observation::Inserted
    );
    cache.record_hash(&side, &key, "h1", NOW).unwrap();
    assert_eq!(
        cache.upsert_observation(&side, &key, 5, 100, NOW + 1).unwrap(),
        Observation::Unchanged { hashed: true }
    );

    assert_eq!(
        cache.upsert_observation(&side, &key, 5, 200, NOW + 2).unwrap(),
        Observation::MetadataChanged
    );
    let record = cache.get(&side, &key).unwrap().unwrap();
    assert!(record.hash.is_none());
    assert!(record.last_hashed.is_none());
    assert_eq!(record.mtime, 200);
    assert_eq!(record.last_observed, NOW + 2);

    let stale = cache
        .select_stale(&side, &["/src".to_string()], HashAlgorithm::Blake3)
        .unwrap();
    assert_eq!(stale.len(), 1);
}

#[test]
fn test_local_observer_rehashes_only_changed_files() {
    let root = tempdir().unwrap();
    let a = root.path().join("a.txt");
    let b = root.path().join("sub/b.txt");
    fs::create_dir_all(b.parent().unwrap()).unwrap();
    fs::write(&a, b"alpha").unwrap();
    fs::write(&b, b"beta").unwrap();
    set_mtime(&a, 1_700_000_000);
    set_mtime(&b, 1_700_000_000);

    let cache = HashCache::in_memory().unwrap();
    let observer = LocalObserver::new(&cache, root.path(), HashAlgorithm::Sha256).with_io_threads(2);

    let first = observer.refresh(NOW, None).unwrap();
    assert_eq!(first.observed, 2);
    assert_eq!(first.hashed, 2);

    let second = observer.refresh(NOW + 10, None).unwrap();
    assert_eq!(second.observed, 2);
    assert_eq!(second.dirty, 0);
    assert_eq!(second.hashed, 0);

    fs::write(&a, b"alpha, edited").unwrap();
    set_mtime(&a, 1_700_000_100);
    let third = observer.refresh(NOW + 20, None).unwrap();
    assert_eq!(third.dirty, 1);
    assert_eq!(third.hashed, 1);

    let key = CacheKey::new(observer.root_key(), "a.txt", HashAlgorithm::Sha256);
    let record = cache.get(&Side::Local, &key).unwrap().unwrap();
    let expected = Hasher::new(HashAlgorithm::Sha256).hash_bytes(b"alpha, edited");
    assert_eq!(record.hash.as_deref(), Some(expected.as_str()));
    assert_eq!(record.last_hashed, Some(NOW + 20));
}

#[test]
fn test_local_observer_skips_logs_directory() {
    let root = tempdir().unwrap();
    fs::create_dir_all(root.path().join("_logs")).unwrap();
    fs::write(root.path().join("_logs/merge_1.json"), b"{}").unwrap();
    fs::write(root.path().join("kept.txt"), b"data").unwrap();

    let cache = HashCache::in_memory().unwrap();
    let observer = LocalObserver::new(&cache, root.path(), HashAlgorithm::Blake3);
    let stats = observer.refresh(NOW, None).unwrap();

    assert_eq!(stats.observed, 1);
    let roots = vec![observer.root_key().to_string()];
    let records = cache.list_records(&Side::Local, &roots, HashAlgorithm::Blake3).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rel, "kept.txt");
}

#[test]
fn test_prune_removes_unobserved_records() {
    let cache = HashCache::in_memory().unwrap();
    let old = CacheKey::new("/r", "old.txt", HashAlgorithm::Blake3);
    let fresh = CacheKey::new("/r", "fresh.txt", HashAlgorithm::Blake3);
    cache.upsert_observation(&Side::Local, &old, 1, 1, NOW - 10_000).unwrap();
    cache.upsert_observation(&Side::Local, &fresh, 1, 1, NOW).unwrap();
    cache.upsert_observation(&Side::remote("srv"), &old, 1, 1, NOW - 10_000).unwrap();

    let stats = cache.prune(3_600, NOW).unwrap();
    assert_eq!(stats.local, 1);
    assert_eq!(stats.remote, 1);
    assert!(cache.get(&Side::Local, &old).unwrap().is_none());
    assert!(cache.get(&Side::Local, &fresh).unwrap().is_some());
}
