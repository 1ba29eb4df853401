//! Worktree lifecycle management.
//!
//! Two classes of worktree exist. The durable *spec worktree* (one per
//! spec, 1:1:1 spec↔worktree↔branch) survives across coordination runs and
//! is recreated from the base branch when a crashed process leaves it in a
//! broken state. Ephemeral *worker worktrees* live for one chunk and are
//! always branched from the spec branch's current tip, so later workers see
//! earlier workers' already-merged output.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::coordination::scheduler::WorkerId;
use crate::git::{GitOps, MergeAttempt};
use crate::{clog_debug, clog_warn, Error, Result};

/// Outcome of a merge attempt between two branches.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Merge completed; the target branch advanced to `commit`.
    Merged { commit: String },
    /// Git reported conflicts; the merge was aborted and the target working
    /// copy restored to its pre-merge state.
    AbortedOnConflict { files: Vec<String> },
    /// The source branch does not exist.
    NotFound { branch: String },
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }
}

/// Diff statistics for a spec branch relative to the base branch, computed
/// on demand from git and never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffStats {
    pub commits: usize,
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

/// A snapshot describing one spec worktree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub spec: String,
    pub base_branch: String,
    pub stats: DiffStats,
}

/// Creates, reuses, and tears down the worktrees a coordination run needs.
#[derive(Clone)]
pub struct WorktreeManager {
    project_root: PathBuf,
    worktrees_dir: PathBuf,
    base_branch: String,
}

impl WorktreeManager {
    pub const WORKER_PREFIX: &'static str = "worker-";

    pub fn new(project_root: &Path, config: &Config) -> Result<Self> {
        // Validate up front that the root is inside a git repository.
        let _ = GitOps::new(project_root)?;
        Ok(Self {
            project_root: project_root.to_path_buf(),
            worktrees_dir: config.worktrees_dir(project_root),
            base_branch: config.base_branch.clone(),
        })
    }

    fn git(&self) -> Result<GitOps> {
        GitOps::new(&self.project_root)
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// The spec's branch carries the same name as the spec itself.
    pub fn spec_branch(&self, spec: &str) -> String {
        spec.to_string()
    }

    pub fn spec_worktree_path(&self, spec: &str) -> PathBuf {
        self.worktrees_dir.join(spec)
    }

    pub fn worker_branch(&self, worker: &WorkerId) -> String {
        format!("{}{}", Self::WORKER_PREFIX, worker.short())
    }

    pub fn worker_worktree_path(&self, worker: &WorkerId) -> PathBuf {
        self.worktrees_dir.join(self.worker_branch(worker))
    }

    /// Get or create the durable worktree for a spec.
    ///
    /// Idempotent: an existing valid worktree is reused as-is. A directory
    /// that is not a functioning worktree on the spec branch (the leavings
    /// of a killed process) is force-removed, along with any orphaned
    /// branch, and everything recreated fresh from the base branch.
    pub fn get_or_create_spec_worktree(&self, spec: &str) -> Result<PathBuf> {
        let path = self.spec_worktree_path(spec);
        let branch = self.spec_branch(spec);
        let git = self.git()?;

        if git.worktree_is_valid(&path, &branch) {
            clog_debug!("Reusing spec worktree for '{}' at {}", spec, path.display());
            return Ok(path);
        }

        if path.exists() {
            clog_warn!(
                "Spec worktree at {} is not valid, recreating",
                path.display()
            );
            self.force_remove(&git, &path);
        }
        // A stale branch without a worktree also blocks recreation.
        if git.branch_exists(&branch)? {
            git.delete_branch(&branch)?;
            git.force_delete_branch_ref(&branch)?;
        }

        std::fs::create_dir_all(&self.worktrees_dir)?;
        git.create_worktree(&branch, &self.base_branch, &path)?;
        clog_debug!("Created spec worktree for '{}' at {}", spec, path.display());
        Ok(path)
    }

    /// Create an ephemeral worktree for a worker, branched from the spec
    /// branch's *current tip* so already-merged sibling output is visible.
    pub fn create_worker_worktree(&self, spec: &str, worker: &WorkerId) -> Result<PathBuf> {
        let branch = self.worker_branch(worker);
        let path = self.worker_worktree_path(worker);
        let git = self.git()?;

        let spec_branch = self.spec_branch(spec);
        if !git.branch_exists(&spec_branch)? {
            return Err(Error::SpecNotFound(spec.to_string()));
        }

        std::fs::create_dir_all(&self.worktrees_dir)?;
        git.create_worktree(&branch, &spec_branch, &path)?;
        clog_debug!(
            "Created worker worktree {} for worker {}",
            path.display(),
            worker.short()
        );
        Ok(path)
    }

    /// Remove a worker's worktree and branch. Tolerant of partial state.
    pub fn remove_worker_worktree(&self, worker: &WorkerId) -> Result<()> {
        let path = self.worker_worktree_path(worker);
        let branch = self.worker_branch(worker);
        let git = self.git()?;
        self.force_remove(&git, &path);
        git.delete_branch(&branch)?;
        Ok(())
    }

    /// Removal that keeps going when the git-level removal fails: the
    /// directory is deleted directly and stale admin files pruned after.
    fn force_remove(&self, git: &GitOps, path: &Path) {
        if let Err(e) = git.remove_worktree(path) {
            clog_warn!(
                "git worktree removal failed for {}: {}, deleting directory",
                path.display(),
                e
            );
            if path.exists() {
                let _ = std::fs::remove_dir_all(path);
            }
            let _ = git.prune_worktrees();
        }
    }

    /// Commit everything in a worker's worktree so its branch carries the
    /// agent's output.
    pub fn commit_worker_output(&self, worker: &WorkerId, message: &str) -> Result<()> {
        let path = self.worker_worktree_path(worker);
        let git = self.git()?;
        if GitOps::is_worktree_dirty(&path) {
            git.commit_all(&path, message)?;
        }
        Ok(())
    }

    /// Merge the spec branch into the base branch in the main working copy.
    ///
    /// On conflict the merge is aborted and the main working copy left
    /// byte-identical to its pre-call state. On success the spec worktree
    /// and branch are optionally removed.
    pub fn merge_worktree(&self, spec: &str, delete_after: bool) -> Result<MergeOutcome> {
        let branch = self.spec_branch(spec);
        let git = self.git()?;
        let message = format!("Merge spec '{}' into {}", spec, self.base_branch);

        let attempt =
            match git.merge_no_ff(&self.project_root, &self.base_branch, &branch, &message) {
                Ok(attempt) => attempt,
                Err(Error::BranchNotFound(name)) if name == branch => {
                    return Ok(MergeOutcome::NotFound { branch: name });
                }
                Err(e) => return Err(e),
            };

        match attempt {
            MergeAttempt::Merged { commit } => {
                if delete_after {
                    let path = self.spec_worktree_path(spec);
                    self.force_remove(&git, &path);
                    git.delete_branch(&branch)?;
                }
                Ok(MergeOutcome::Merged { commit })
            }
            MergeAttempt::Conflicted { files } => Ok(MergeOutcome::AbortedOnConflict { files }),
        }
    }

    /// Merge a worker's branch into the spec branch, inside the spec
    /// worktree. Same protocol as [`Self::merge_worktree`].
    pub fn merge_worker_to_spec(&self, spec: &str, worker: &WorkerId) -> Result<MergeOutcome> {
        let spec_branch = self.spec_branch(spec);
        let worker_branch = self.worker_branch(worker);
        let spec_path = self.spec_worktree_path(spec);
        if !spec_path.exists() {
            return Err(Error::SpecNotFound(spec.to_string()));
        }
        let git = self.git()?;
        let message = format!("Merge {} into spec '{}'", worker_branch, spec);

        let attempt = match git.merge_no_ff(&spec_path, &spec_branch, &worker_branch, &message) {
            Ok(attempt) => attempt,
            Err(Error::BranchNotFound(name)) if name == worker_branch => {
                return Ok(MergeOutcome::NotFound { branch: name });
            }
            Err(e) => return Err(e),
        };

        Ok(match attempt {
            MergeAttempt::Merged { commit } => MergeOutcome::Merged { commit },
            MergeAttempt::Conflicted { files } => MergeOutcome::AbortedOnConflict { files },
        })
    }

    /// Remove every worker-prefixed worktree directory and branch,
    /// independent of whether individual workers succeeded. Returns the
    /// number of worktree directories removed.
    pub fn cleanup_all_workers(&self) -> usize {
        clog_debug!("WorktreeManager::cleanup_all_workers");
        let Ok(git) = self.git() else {
            clog_warn!("Could not open repository for worker cleanup");
            return 0;
        };

        let mut removed = 0;
        if let Ok(entries) = std::fs::read_dir(&self.worktrees_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if !name.starts_with(Self::WORKER_PREFIX) {
                    continue;
                }
                self.force_remove(&git, &entry.path());
                removed += 1;
            }
        }

        if let Ok(branches) = git.branches_with_prefix(Self::WORKER_PREFIX) {
            for branch in branches {
                let _ = git.delete_branch(&branch);
                let _ = git.force_delete_branch_ref(&branch);
            }
        }
        let _ = git.prune_worktrees();

        clog_debug!("cleanup_all_workers: removed {} worktrees", removed);
        removed
    }

    /// Describe a spec worktree, computing diff statistics fresh from git.
    pub fn worktree_info(&self, spec: &str) -> Result<WorktreeInfo> {
        let path = self.spec_worktree_path(spec);
        let branch = self.spec_branch(spec);
        if !path.exists() {
            return Err(Error::SpecNotFound(spec.to_string()));
        }
        let git = self.git()?;
        let commits = git.commit_count(&self.base_branch, &branch)?;
        let (files_changed, insertions, deletions) = git.diff_stats(&self.base_branch, &branch)?;
        Ok(WorktreeInfo {
            path,
            branch,
            spec: spec.to_string(),
            base_branch: self.base_branch.clone(),
            stats: DiffStats {
                commits,
                files_changed,
                insertions,
                deletions,
            },
        })
    }
}
