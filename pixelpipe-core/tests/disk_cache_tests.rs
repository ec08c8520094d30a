//! Integration tests for the journaled disk cache
//!
//! These tests verify:
//! - Editor/Snapshot round trips and exclusivity
//! - Persistence across reopen
//! - Recovery from a corrupt journal
//! - Size-bounded eviction

use pixelpipe_core::disk::hash_key;
use pixelpipe_core::DiskCache;
use std::fs;
use tempfile::TempDir;

fn write_entry(cache: &DiskCache, key: &str, metadata: &[u8], data: &[u8]) {
    let mut editor = cache.open_editor(key).unwrap().expect("entry is busy");
    editor.write_metadata(metadata).unwrap();
    editor.write_data(data).unwrap();
    editor.commit().unwrap();
}

#[test]
fn test_round_trip_returns_identical_bytes() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path(), 1024 * 1024).unwrap();

    let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    write_entry(&cache, "https://example.com/a.png", b"meta", &data);

    let snapshot = cache
        .open_snapshot("https://example.com/a.png")
        .unwrap()
        .expect("entry missing");
    let read = snapshot.read_data().unwrap();
    assert_eq!(read.len(), data.len());
    assert_eq!(read, data);
    assert_eq!(snapshot.read_metadata().unwrap(), b"meta");
}

#[test]
fn test_second_editor_for_same_key_is_refused() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path(), 1024).unwrap();

    let editor = cache.open_editor("k").unwrap();
    assert!(editor.is_some());
    assert!(cache.open_editor("k").unwrap().is_none());

    // Other keys are unaffected
    assert!(cache.open_editor("other").unwrap().is_some());

    drop(editor);
    assert!(cache.open_editor("k").unwrap().is_some());
}

#[test]
fn test_uncommitted_edit_is_invisible() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path(), 1024).unwrap();

    let mut editor = cache.open_editor("k").unwrap().unwrap();
    editor.write_data(b"partial").unwrap();
    assert!(cache.open_snapshot("k").unwrap().is_none());
    editor.abort().unwrap();

    assert!(cache.open_snapshot("k").unwrap().is_none());
    assert!(cache.is_empty());
}

#[test]
fn test_entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        write_entry(&cache, "a", b"", b"first");
        write_entry(&cache, "b", b"", b"second");
        cache.remove("a").unwrap();
        cache.flush().unwrap();
    }

    let cache = DiskCache::open(dir.path(), 1024).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.open_snapshot("a").unwrap().is_none());
    let snapshot = cache.open_snapshot("b").unwrap().unwrap();
    assert_eq!(snapshot.read_data().unwrap(), b"second");
    assert_eq!(cache.size(), 6);
}

#[test]
fn test_corrupt_journal_yields_empty_usable_cache() {
    let dir = TempDir::new().unwrap();
    {
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        write_entry(&cache, "a", b"", b"data");
        cache.flush().unwrap();
    }

    fs::write(dir.path().join("journal"), "not a journal\n").unwrap();

    let cache = DiskCache::open(dir.path(), 1024).unwrap();
    assert!(cache.is_empty());
    assert!(cache.open_snapshot("a").unwrap().is_none());

    write_entry(&cache, "a", b"", b"fresh");
    assert_eq!(
        cache.open_snapshot("a").unwrap().unwrap().read_data().unwrap(),
        b"fresh"
    );
}

#[test]
fn test_size_stays_within_budget() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path(), 100).unwrap();

    for i in 0..10 {
        write_entry(&cache, &format!("key-{i}"), b"", &[0u8; 30]);
        cache.trim().unwrap();
        assert!(cache.size() <= 100, "size {} after insert {}", cache.size(), i);
    }

    // The most recent entries are the ones kept
    assert!(cache.open_snapshot("key-9").unwrap().is_some());
    assert!(cache.open_snapshot("key-0").unwrap().is_none());
}

#[test]
fn test_files_are_named_by_key_hash() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path(), 1024).unwrap();
    write_entry(&cache, "https://example.com/a.png", b"m", b"d");

    let hash = hash_key("https://example.com/a.png");
    assert_eq!(hash.len(), 64);
    assert!(dir.path().join(format!("{hash}.0")).exists());
    assert!(dir.path().join(format!("{hash}.1")).exists());
    assert_eq!(cache.keys(), vec![hash]);
}
