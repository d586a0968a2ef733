//! Persistence crash-safety tests
//!
//! Covers:
//! - Recovery from every on-disk state an interrupted rewrite can leave
//! - Real process aborts at each rewrite crash point, then reload
//! - Reload idempotence
//! - Corruption tolerance and the corruption threshold
//!
//! Real filesystem, no mocks.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use docstash::crash_point::points;
use docstash::persistence::temp_path;
use docstash::{Datastore, DatastoreOptions, ErrorKind};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn write_lines(path: &Path, lines: &[Value]) {
    let mut content = String::new();
    for line in lines {
        content.push_str(&line.to_string());
        content.push('\n');
    }
    fs::write(path, content).unwrap();
}

fn data_path(dir: &TempDir) -> PathBuf {
    dir.path().join("collection.db")
}

async fn load(path: &Path) -> Datastore {
    let db = Datastore::new(DatastoreOptions::with_filename(path)).unwrap();
    db.load_database().await.unwrap();
    db
}

async fn snapshot(path: &Path) -> Vec<Value> {
    load(path).await.all_documents().await.unwrap()
}

fn old_state() -> Vec<Value> {
    vec![json!({"_id": "a", "v": 1}), json!({"_id": "b", "v": 2})]
}

fn new_state() -> Vec<Value> {
    vec![json!({"_id": "a", "v": 10}), json!({"_id": "c", "v": 30})]
}

// =============================================================================
// Interrupted Rewrite States
// =============================================================================

/// Crash after the temp file was written but before the rename: the live
/// file still holds the complete old state.
#[tokio::test]
async fn test_crash_before_rename_keeps_old_state() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    write_lines(&path, &old_state());
    write_lines(&temp_path(&path), &new_state());

    assert_eq!(snapshot(&path).await, old_state());
}

/// A half-written temp file next to an intact live file is ignored.
#[tokio::test]
async fn test_truncated_temp_file_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    write_lines(&path, &old_state());
    fs::write(temp_path(&path), "{\"_id\":\"a\",\"v\":1").unwrap();

    assert_eq!(snapshot(&path).await, old_state());
}

/// Crash after the rename but before the directory flush: the live file
/// is the complete new state.
#[tokio::test]
async fn test_crash_after_rename_yields_new_state() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    write_lines(&path, &new_state());

    assert_eq!(snapshot(&path).await, new_state());
}

/// Only the temp file survived: it is promoted to the live name.
#[tokio::test]
async fn test_lone_temp_file_is_promoted() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    write_lines(&temp_path(&path), &new_state());

    assert_eq!(snapshot(&path).await, new_state());
    assert!(path.exists());
    assert!(!temp_path(&path).exists());
}

/// First run: an empty live file is created.
#[tokio::test]
async fn test_first_run_creates_empty_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/dir/collection.db");

    assert!(snapshot(&path).await.is_empty());
    assert!(path.exists());
}

// =============================================================================
// Real Crashes
// =============================================================================

/// Abort the CLI at every rewrite crash point during the compaction that
/// loading performs, then reload: the dataset is intact every time.
#[tokio::test]
async fn test_abort_at_each_rewrite_point_then_reload() {
    let rewrite_points = [
        points::REWRITE_BEFORE_TEMP_WRITE,
        points::REWRITE_AFTER_TEMP_WRITE,
        points::REWRITE_AFTER_TEMP_FSYNC,
        points::REWRITE_AFTER_RENAME,
        points::REWRITE_AFTER_DIR_SYNC,
    ];

    for point in rewrite_points {
        let dir = TempDir::new().unwrap();
        let path = data_path(&dir);
        let mut lines = old_state();
        lines.push(json!({"_id": "a", "v": 5}));
        lines.push(json!({"$$deleted": true, "_id": "b"}));
        write_lines(&path, &lines);

        let status = Command::new(env!("CARGO_BIN_EXE_docstash"))
            .args(["compact", "--file"])
            .arg(&path)
            .env("DOCSTASH_CRASH_POINT", point)
            .output()
            .unwrap()
            .status;
        assert!(!status.success(), "process survived crash point {}", point);

        assert_eq!(
            snapshot(&path).await,
            vec![json!({"_id": "a", "v": 5})],
            "wrong state after crash at {}",
            point
        );
    }
}

// =============================================================================
// Reload
// =============================================================================

#[tokio::test]
async fn test_reload_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    {
        let db = load(&path).await;
        db.insert_many(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})])
            .await
            .unwrap();
        db.remove(json!({"n": 2}), Default::default()).await.unwrap();
    }

    let first = snapshot(&path).await;
    let second = snapshot(&path).await;
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_appended_changes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    {
        let db = load(&path).await;
        db.insert(json!({"_id": "x", "n": 1})).await.unwrap();
        db.update(
            json!({"_id": "x"}),
            json!({"$set": {"n": 2}}),
            Default::default(),
        )
        .await
        .unwrap();
    }
    let lines = fs::read_to_string(&path).unwrap();
    assert_eq!(lines.lines().count(), 2);

    assert_eq!(snapshot(&path).await, vec![json!({"_id": "x", "n": 2})]);
}

// =============================================================================
// Corruption
// =============================================================================

/// A torn last line, as left by a crash mid-append, is skipped.
#[tokio::test]
async fn test_torn_final_line_is_skipped() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    let mut content = String::new();
    for i in 0..20 {
        content.push_str(&json!({"_id": format!("d{:02}", i)}).to_string());
        content.push('\n');
    }
    content.push_str("{\"_id\":\"d20\",\"na");
    fs::write(&path, content).unwrap();

    let db = load(&path).await;
    assert_eq!(db.count(json!({})).await.unwrap(), 20);
}

#[tokio::test]
async fn test_corruption_beyond_threshold_fails_load() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    fs::write(&path, "{\"_id\":\"a\"}\ngarbage\nmore garbage\n").unwrap();

    let db = Datastore::new(DatastoreOptions::with_filename(&path)).unwrap();
    let err = db.load_database().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corruption);
    assert!(!db.is_ready());

    // The damaged file is left untouched
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("garbage"));
}

#[tokio::test]
async fn test_threshold_one_accepts_any_corruption() {
    let dir = TempDir::new().unwrap();
    let path = data_path(&dir);
    fs::write(&path, "{\"_id\":\"a\"}\ngarbage\nmore garbage\n").unwrap();

    let options = DatastoreOptions::with_filename(&path).corrupt_alert_threshold(1.0);
    let db = Datastore::new(options).unwrap();
    let stats = db.load_database().await.unwrap();
    assert_eq!(stats.corrupt_lines, 2);
    assert_eq!(stats.documents, 1);
}
