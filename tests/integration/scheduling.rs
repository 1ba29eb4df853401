//! End-to-end coordinator runs against real repositories with a scripted
//! agent.

use crate::fixtures::{file_chunk, phase_with, plan_with, ScriptedAgent, TestRepo};
use crew::coordination::{Coordinator, ProgressSnapshot};
use crew::core::chunk::{ChunkId, ChunkStatus};
use crew::core::plan::Plan;

#[tokio::test]
async fn test_full_run_completes_all_chunks() {
    let repo = TestRepo::new();
    let plan = plan_with(vec![
        phase_with(
            1,
            &[],
            vec![file_chunk("c1", "alpha.txt"), file_chunk("c2", "beta.txt")],
        ),
        phase_with(2, &[1], vec![file_chunk("c3", "gamma.txt")]),
    ]);

    let coordinator = Coordinator::new(
        repo.config(),
        repo.path.clone(),
        "auth",
        plan,
        ScriptedAgent::new(),
    )
    .unwrap();

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.completed.len(), 3);
    assert!(summary.failed.is_empty());
    assert!(summary.skipped.is_empty());
    assert!(summary.is_success());

    // All worker output landed in the spec worktree.
    let spec_path = repo.path.join(".worktrees/auth");
    assert!(spec_path.join("alpha.txt").exists());
    assert!(spec_path.join("beta.txt").exists());
    assert!(spec_path.join("gamma.txt").exists());
}

#[tokio::test]
async fn test_run_leaves_no_worker_residue() {
    let repo = TestRepo::new();
    let plan = plan_with(vec![phase_with(
        1,
        &[],
        vec![file_chunk("c1", "alpha.txt"), file_chunk("c2", "beta.txt")],
    )]);

    let coordinator = Coordinator::new(
        repo.config(),
        repo.path.clone(),
        "auth",
        plan,
        ScriptedAgent::new(),
    )
    .unwrap();
    coordinator.run().await.unwrap();

    // Only the spec worktree and bookkeeping remain under .worktrees.
    let worktrees = repo.path.join(".worktrees");
    for entry in std::fs::read_dir(&worktrees).unwrap() {
        let name = entry.unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(
            !name.starts_with("worker-"),
            "worker residue left behind: {}",
            name
        );
    }

    // No worker branches either.
    let git = repo.git_ops().unwrap();
    assert!(git.branches_with_prefix("worker-").unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_chunk_skips_dependent_phase() {
    let repo = TestRepo::new();
    let plan = plan_with(vec![
        phase_with(1, &[], vec![file_chunk("c1", "alpha.txt")]),
        phase_with(2, &[1], vec![file_chunk("c3", "gamma.txt")]),
    ]);

    let coordinator = Coordinator::new(
        repo.config(),
        repo.path.clone(),
        "auth",
        plan,
        ScriptedAgent::failing_on(["alpha.txt"]),
    )
    .unwrap();

    let summary = coordinator.run().await.unwrap();
    assert!(summary.completed.is_empty());
    assert_eq!(summary.failed, vec![ChunkId::from("c1")]);
    assert_eq!(summary.skipped, vec![ChunkId::from("c3")]);
    assert!(!summary.is_success());
}

#[tokio::test]
async fn test_chunk_status_written_back_to_plan_file() {
    let repo = TestRepo::new();
    let plan = plan_with(vec![phase_with(1, &[], vec![file_chunk("c1", "alpha.txt")])]);

    let plan_path = repo.path.join("plan.json");
    plan.save(&plan_path).unwrap();

    let coordinator = Coordinator::new(
        repo.config(),
        repo.path.clone(),
        "auth",
        plan,
        ScriptedAgent::new(),
    )
    .unwrap()
    .with_plan_path(plan_path.clone());
    coordinator.run().await.unwrap();

    let saved = Plan::load(&plan_path).unwrap();
    let chunk = saved.chunk(&ChunkId::from("c1")).unwrap();
    assert_eq!(chunk.status, ChunkStatus::Completed);
    assert!(chunk.started_at.is_some());
    assert!(chunk.completed_at.is_some());
    assert!(chunk.output.is_some());
}

#[tokio::test]
async fn test_progress_snapshot_written_during_run() {
    let repo = TestRepo::new();
    let plan = plan_with(vec![phase_with(1, &[], vec![file_chunk("c1", "alpha.txt")])]);

    let coordinator = Coordinator::new(
        repo.config(),
        repo.path.clone(),
        "auth",
        plan,
        ScriptedAgent::new(),
    )
    .unwrap();
    coordinator.run().await.unwrap();

    let snapshot = ProgressSnapshot::load(&repo.config().progress_path(&repo.path)).unwrap();
    assert_eq!(snapshot.spec, "auth");
    // The final snapshot is written after the last release.
    assert!(snapshot.workers.is_empty());
    assert!(snapshot.claimed_files.is_empty());
}

#[tokio::test]
async fn test_worker_limit_is_respected() {
    let repo = TestRepo::new();
    let mut config = repo.config();
    config.max_workers = 1;

    let plan = plan_with(vec![phase_with(
        1,
        &[],
        vec![
            file_chunk("c1", "alpha.txt"),
            file_chunk("c2", "beta.txt"),
            file_chunk("c3", "gamma.txt"),
        ],
    )]);

    let coordinator = Coordinator::new(
        config,
        repo.path.clone(),
        "auth",
        plan,
        ScriptedAgent::new(),
    )
    .unwrap();

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.completed.len(), 3);

    let spec_path = repo.path.join(".worktrees/auth");
    assert!(spec_path.join("alpha.txt").exists());
    assert!(spec_path.join("beta.txt").exists());
    assert!(spec_path.join("gamma.txt").exists());
}
