//! Lock manager behavior with the real process probe.

use std::time::{Duration, Instant};

use tempfile::TempDir;

use crew::coordination::{FileLock, SpecNumbering};
use crew::Error;

#[test]
fn test_lock_smoke() {
    let dir = TempDir::new().unwrap();
    let mut lock = FileLock::new(dir.path(), "merge-auth");
    lock.acquire(Duration::from_secs(1)).unwrap();
    assert!(lock.path().exists());
    lock.release();
    assert!(!lock.path().exists());
}

#[test]
fn test_live_holder_blocks_until_timeout() {
    let dir = TempDir::new().unwrap();
    // This test process is the holder, so the lock is genuinely live.
    std::fs::write(
        dir.path().join("merge-auth.lock"),
        std::process::id().to_string(),
    )
    .unwrap();

    let mut lock = FileLock::new(dir.path(), "merge-auth");
    let err = lock.acquire(Duration::from_millis(100)).unwrap_err();
    match err {
        Error::LockTimeout { resource, waited } => {
            assert_eq!(resource, "merge-auth");
            assert!(waited >= Duration::from_millis(100));
        }
        other => panic!("Expected LockTimeout, got {:?}", other),
    }
}

#[test]
fn test_dead_holder_reclaimed_without_full_wait() {
    let dir = TempDir::new().unwrap();
    // PIDs this large are never live on a default pid_max.
    std::fs::write(dir.path().join("merge-auth.lock"), "3999999").unwrap();

    let start = Instant::now();
    let mut lock = FileLock::new(dir.path(), "merge-auth");
    lock.acquire(Duration::from_secs(30)).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));

    // The reclaimed lock now carries this process's PID.
    let contents = std::fs::read_to_string(lock.path()).unwrap();
    assert_eq!(contents.trim(), std::process::id().to_string());
}

#[test]
fn test_unrelated_resources_do_not_contend() {
    let dir = TempDir::new().unwrap();
    let mut merge_auth = FileLock::new(dir.path(), "merge-auth");
    let mut merge_billing = FileLock::new(dir.path(), "merge-billing");
    let mut numbering = FileLock::new(dir.path(), "spec-numbering");

    merge_auth.acquire(Duration::from_secs(1)).unwrap();
    merge_billing.acquire(Duration::from_secs(1)).unwrap();
    numbering.acquire(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_spec_numbering_across_worktrees() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("specs/001-auth")).unwrap();
    std::fs::create_dir_all(dir.path().join("specs/003-billing")).unwrap();
    std::fs::create_dir_all(dir.path().join(".worktrees/auth/specs/005-search")).unwrap();
    // Malformed names are ignored.
    std::fs::create_dir_all(dir.path().join("specs/abc-x")).unwrap();
    std::fs::create_dir_all(dir.path().join("specs/12-x")).unwrap();

    let mut numbering = SpecNumbering::new(
        &dir.path().join(".worktrees/.locks"),
        &dir.path().join("specs"),
        &dir.path().join(".worktrees"),
    );
    numbering.acquire(Duration::from_secs(1)).unwrap();
    assert_eq!(numbering.next_spec_number().unwrap(), 6);
    numbering.release();
}
