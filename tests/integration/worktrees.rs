//! Worktree lifecycle: creation, reuse, crash recovery, merging, cleanup.

use crate::fixtures::TestRepo;
use crew::coordination::scheduler::WorkerId;
use crew::coordination::worktree::MergeOutcome;

#[test]
fn test_spec_worktree_created_with_branch() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    let path = manager.get_or_create_spec_worktree("auth").unwrap();

    assert!(path.exists());
    assert_eq!(path, repo.path.join(".worktrees/auth"));
    assert!(repo.branch_exists("auth"));
    assert!(path.join("README.md").exists());
}

#[test]
fn test_get_or_create_is_idempotent() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    let path = manager.get_or_create_spec_worktree("auth").unwrap();
    TestRepo::commit_file_in(&path, "work.txt", "in progress\n", "WIP").unwrap();

    // A second call reuses the worktree rather than recreating it.
    let again = manager.get_or_create_spec_worktree("auth").unwrap();
    assert_eq!(path, again);
    assert!(again.join("work.txt").exists());
}

#[test]
fn test_stale_directory_is_recreated() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    // A directory that is not a git worktree, as a killed process leaves it.
    let stale = repo.path.join(".worktrees/auth");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("junk.txt"), "junk").unwrap();

    let path = manager.get_or_create_spec_worktree("auth").unwrap();
    assert_eq!(path, stale);
    assert!(path.join("README.md").exists());
    assert!(!path.join("junk.txt").exists());
    assert!(repo.branch_exists("auth"));
}

#[test]
fn test_worker_worktree_branches_from_spec_tip() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    let spec_path = manager.get_or_create_spec_worktree("auth").unwrap();
    // Simulate a sibling chunk already merged into the spec branch.
    TestRepo::commit_file_in(&spec_path, "sibling.txt", "sibling output\n", "Sibling chunk")
        .unwrap();

    let worker = WorkerId::new();
    let worker_path = manager.create_worker_worktree("auth", &worker).unwrap();

    // The worker sees the sibling's file: it branched from the spec tip,
    // not from the base branch.
    assert!(worker_path.join("sibling.txt").exists());
    assert!(worker_path.join("README.md").exists());

    manager.remove_worker_worktree(&worker).unwrap();
}

#[test]
fn test_remove_worker_worktree_removes_branch_and_dir() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    manager.get_or_create_spec_worktree("auth").unwrap();
    let worker = WorkerId::new();
    let worker_path = manager.create_worker_worktree("auth", &worker).unwrap();
    let branch = manager.worker_branch(&worker);
    assert!(repo.branch_exists(&branch));

    manager.remove_worker_worktree(&worker).unwrap();
    assert!(!worker_path.exists());
    assert!(!repo.branch_exists(&branch));
}

#[test]
fn test_merge_worktree_success() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    let spec_path = manager.get_or_create_spec_worktree("auth").unwrap();
    TestRepo::commit_file_in(&spec_path, "feature.txt", "feature\n", "Add feature").unwrap();

    let outcome = manager.merge_worktree("auth", false).unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    assert!(repo.path.join("feature.txt").exists());
    // The spec worktree and branch survive without delete_after.
    assert!(spec_path.exists());
    assert!(repo.branch_exists("auth"));
}

#[test]
fn test_merge_worktree_delete_after() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    let spec_path = manager.get_or_create_spec_worktree("auth").unwrap();
    TestRepo::commit_file_in(&spec_path, "feature.txt", "feature\n", "Add feature").unwrap();

    let outcome = manager.merge_worktree("auth", true).unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    assert!(!spec_path.exists());
    assert!(!repo.branch_exists("auth"));
}

#[test]
fn test_failed_merge_leaves_main_copy_pristine() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    let spec_path = manager.get_or_create_spec_worktree("auth").unwrap();
    TestRepo::commit_file_in(&spec_path, "README.md", "spec version\n", "Spec edit").unwrap();
    repo.create_and_commit("README.md", "main version\n", "Main edit")
        .unwrap();

    let before = std::fs::read_to_string(repo.path.join("README.md")).unwrap();
    assert!(repo.porcelain_status().is_empty());

    let outcome = manager.merge_worktree("auth", false).unwrap();
    match outcome {
        MergeOutcome::AbortedOnConflict { files } => {
            assert_eq!(files, vec!["README.md".to_string()]);
        }
        other => panic!("Expected AbortedOnConflict, got {:?}", other),
    }

    // Byte-identical pre-call state: clean status, unchanged contents.
    assert!(repo.porcelain_status().is_empty());
    let after = std::fs::read_to_string(repo.path.join("README.md")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_merge_worktree_missing_spec_branch() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    let outcome = manager.merge_worktree("ghost", false).unwrap();
    assert!(matches!(outcome, MergeOutcome::NotFound { .. }));
}

#[test]
fn test_cleanup_all_workers_sweeps_dirs_and_branches() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    manager.get_or_create_spec_worktree("auth").unwrap();
    let w1 = WorkerId::new();
    let w2 = WorkerId::new();
    manager.create_worker_worktree("auth", &w1).unwrap();
    manager.create_worker_worktree("auth", &w2).unwrap();

    let removed = manager.cleanup_all_workers();
    assert_eq!(removed, 2);

    assert!(!manager.worker_worktree_path(&w1).exists());
    assert!(!manager.worker_worktree_path(&w2).exists());
    assert!(!repo.branch_exists(&manager.worker_branch(&w1)));
    assert!(!repo.branch_exists(&manager.worker_branch(&w2)));
    // The spec worktree is untouched.
    assert!(manager.spec_worktree_path("auth").exists());
    assert!(repo.branch_exists("auth"));
}

#[test]
fn test_worktree_info_computes_diff_stats() {
    let repo = TestRepo::new();
    let manager = repo.worktree_manager().unwrap();

    let spec_path = manager.get_or_create_spec_worktree("auth").unwrap();
    TestRepo::commit_file_in(&spec_path, "one.txt", "line one\n", "Add one").unwrap();
    TestRepo::commit_file_in(&spec_path, "two.txt", "line two\n", "Add two").unwrap();

    let info = manager.worktree_info("auth").unwrap();
    assert_eq!(info.spec, "auth");
    assert_eq!(info.branch, "auth");
    assert_eq!(info.base_branch, "main");
    assert_eq!(info.stats.commits, 2);
    assert_eq!(info.stats.files_changed, 2);
    assert_eq!(info.stats.insertions, 2);
    assert_eq!(info.stats.deletions, 0);
}
