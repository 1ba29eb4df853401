//! Serialized merge-back of worker output into the spec worktree.
//!
//! Workers run concurrently but their merges do not: every worker→spec
//! merge in a run goes through the `merge-{spec}` file lock, protecting the
//! spec worktree's git index from concurrent mutation (including by a
//! second process touching the same project). No semantic conflict
//! resolution happens here; a git-level conflict fails the chunk.

use std::path::PathBuf;
use std::time::Duration;

use crate::coordination::lock::FileLock;
use crate::coordination::scheduler::WorkerId;
use crate::coordination::worktree::{MergeOutcome, WorktreeManager};
use crate::{clog_debug, clog_warn, util, Result};

/// Fixed failure reason recorded on a chunk when its merge conflicts.
pub const CONFLICT_REASON: &str = "merge conflict with spec branch";

pub struct MergeCoordinator {
    locks_dir: PathBuf,
    lock_timeout: Duration,
    worktrees: WorktreeManager,
}

impl MergeCoordinator {
    pub fn new(locks_dir: PathBuf, lock_timeout: Duration, worktrees: WorktreeManager) -> Self {
        Self {
            locks_dir,
            lock_timeout,
            worktrees,
        }
    }

    /// Lock resource name for a spec's merges. Distinct specs get distinct
    /// locks and never contend.
    pub fn lock_resource(spec: &str) -> String {
        format!("merge-{}", spec)
    }

    /// Merge a worker's branch into the spec worktree.
    ///
    /// Commits the worker's uncommitted output first, then merges under the
    /// spec's merge lock. The worker's worktree and branch are destroyed
    /// unconditionally afterwards, whatever the outcome - including when
    /// the lock could not be acquired.
    pub async fn merge_worker(
        &self,
        spec: &str,
        worker: WorkerId,
        commit_message: &str,
    ) -> Result<MergeOutcome> {
        let locks_dir = self.locks_dir.clone();
        let timeout = self.lock_timeout;
        let spec = spec.to_string();
        let message = commit_message.to_string();
        let worktrees = self.worktrees.clone();

        // Lock polling and git2 work both block; keep them off the runtime.
        util::blocking(move || {
            let mut lock = FileLock::new(&locks_dir, &Self::lock_resource(&spec));
            let result = lock.acquire(timeout).and_then(|()| {
                worktrees.commit_worker_output(&worker, &message)?;
                let outcome = worktrees.merge_worker_to_spec(&spec, &worker)?;
                match &outcome {
                    MergeOutcome::Merged { commit } => {
                        clog_debug!(
                            "Worker {} merged into '{}' at {}",
                            worker.short(),
                            spec,
                            commit
                        );
                    }
                    MergeOutcome::AbortedOnConflict { files } => {
                        clog_warn!(
                            "Worker {} merge into '{}' aborted on conflict: {}",
                            worker.short(),
                            spec,
                            files.join(", ")
                        );
                    }
                    MergeOutcome::NotFound { branch } => {
                        clog_warn!("Worker branch '{}' missing at merge time", branch);
                    }
                }
                Ok(outcome)
            });

            // Unconditional teardown of the ephemeral worktree and branch.
            if let Err(e) = worktrees.remove_worker_worktree(&worker) {
                clog_warn!(
                    "Failed to remove worker {} worktree: {}",
                    worker.short(),
                    e
                );
            }
            lock.release();
            result
        })
        .await
    }
}
