//! Serialized worker→spec merges through the MergeCoordinator.

use std::time::Duration;

use crate::fixtures::TestRepo;
use crew::coordination::scheduler::WorkerId;
use crew::coordination::worktree::MergeOutcome;
use crew::coordination::MergeCoordinator;

fn coordinator(repo: &TestRepo) -> MergeCoordinator {
    let config = repo.config();
    MergeCoordinator::new(
        config.locks_dir(&repo.path),
        Duration::from_secs(5),
        repo.worktree_manager().unwrap(),
    )
}

#[tokio::test]
async fn test_merge_worker_commits_and_merges_output() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();
    let merges = coordinator(&repo);

    let spec_path = manager.get_or_create_spec_worktree("auth").unwrap();
    let worker = WorkerId::new();
    let worker_path = manager.create_worker_worktree("auth", &worker).unwrap();

    // Uncommitted agent output in the worker's worktree.
    std::fs::write(worker_path.join("login.rs"), "fn login() {}\n").unwrap();

    let outcome = merges
        .merge_worker("auth", worker, "c1: add login")
        .await
        .unwrap();

    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    assert!(spec_path.join("login.rs").exists());

    // Worktree and branch are gone whatever the outcome.
    assert!(!worker_path.exists());
    assert!(!repo.branch_exists(&manager.worker_branch(&worker)));
}

#[tokio::test]
async fn test_merge_conflict_fails_cleanly_and_destroys_worker() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();
    let merges = coordinator(&repo);

    let spec_path = manager.get_or_create_spec_worktree("auth").unwrap();
    let worker = WorkerId::new();
    let worker_path = manager.create_worker_worktree("auth", &worker).unwrap();

    // The spec branch moves after the worker branched; both edit README.
    TestRepo::commit_file_in(&spec_path, "README.md", "spec version\n", "Spec edit").unwrap();
    std::fs::write(worker_path.join("README.md"), "worker version\n").unwrap();

    let outcome = merges
        .merge_worker("auth", worker, "c1: readme edit")
        .await
        .unwrap();

    match outcome {
        MergeOutcome::AbortedOnConflict { files } => {
            assert_eq!(files, vec!["README.md".to_string()]);
        }
        other => panic!("Expected AbortedOnConflict, got {:?}", other),
    }

    // The spec worktree is restored to its pre-merge state.
    let spec_readme = std::fs::read_to_string(spec_path.join("README.md")).unwrap();
    assert_eq!(spec_readme, "spec version\n");

    // Unconditional teardown applies on the conflict path too.
    assert!(!worker_path.exists());
    assert!(!repo.branch_exists(&manager.worker_branch(&worker)));
}

#[tokio::test]
async fn test_sequential_workers_build_on_each_other() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();
    let merges = coordinator(&repo);

    let spec_path = manager.get_or_create_spec_worktree("auth").unwrap();

    let w1 = WorkerId::new();
    let p1 = manager.create_worker_worktree("auth", &w1).unwrap();
    std::fs::write(p1.join("first.txt"), "first\n").unwrap();
    let outcome = merges.merge_worker("auth", w1, "c1: first").await.unwrap();
    assert!(outcome.is_merged());

    // A worker started after the merge sees the first worker's file.
    let w2 = WorkerId::new();
    let p2 = manager.create_worker_worktree("auth", &w2).unwrap();
    assert!(p2.join("first.txt").exists());

    std::fs::write(p2.join("second.txt"), "second\n").unwrap();
    let outcome = merges.merge_worker("auth", w2, "c2: second").await.unwrap();
    assert!(outcome.is_merged());

    assert!(spec_path.join("first.txt").exists());
    assert!(spec_path.join("second.txt").exists());
}

#[tokio::test]
async fn test_merge_lock_released_after_each_merge() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();
    let merges = coordinator(&repo);

    manager.get_or_create_spec_worktree("auth").unwrap();

    let worker = WorkerId::new();
    let path = manager.create_worker_worktree("auth", &worker).unwrap();
    std::fs::write(path.join("a.txt"), "a\n").unwrap();
    merges.merge_worker("auth", worker, "c1: a").await.unwrap();

    let lock_path = repo
        .config()
        .locks_dir(&repo.path)
        .join(format!("{}.lock", MergeCoordinator::lock_resource("auth")));
    assert!(!lock_path.exists());
}
