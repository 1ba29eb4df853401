use std::path::{Path, PathBuf};

use git2::{BranchType, ErrorCode, IndexAddOption, MergeOptions, Repository, Signature};

use crate::{clog_debug, clog_warn, Error, Result};

/// Low-level outcome of a merge attempt, before the worktree layer maps it
/// onto [`crate::coordination::worktree::MergeOutcome`].
#[derive(Debug, Clone)]
pub enum MergeAttempt {
    /// Merge completed (or the target already contained the source).
    Merged { commit: String },
    /// Merge hit index conflicts; the working copy was restored.
    Conflicted { files: Vec<String> },
}

pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: &Path) -> Result<Self> {
        clog_debug!("GitOps::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Create `branch` at the tip of `from_branch` and add a worktree for it.
    ///
    /// The new branch is pinned to `from_branch`'s current tip, not the main
    /// working copy's HEAD, so callers control exactly which line of history
    /// a worktree starts from.
    pub fn create_worktree(
        &self,
        branch: &str,
        from_branch: &str,
        worktree_path: &Path,
    ) -> Result<()> {
        clog_debug!(
            "GitOps::create_worktree branch={} from={} path={}",
            branch,
            from_branch,
            worktree_path.display()
        );
        let repo = self.repo()?;
        let from = repo.find_branch(from_branch, BranchType::Local)?;
        let commit = from.into_reference().peel_to_commit()?;
        clog_debug!("Creating branch {} from commit {}", branch, commit.id());
        let branch_obj = repo.branch(branch, &commit, false)?;
        let branch_ref = branch_obj.into_reference();
        let mut opts = git2::WorktreeAddOptions::new();
        opts.reference(Some(&branch_ref));
        // Use worktree path's folder name as worktree name (branch may contain slashes)
        let worktree_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch);
        repo.worktree(worktree_name, worktree_path, Some(&opts))?;
        clog_debug!("Worktree created successfully");
        Ok(())
    }

    /// Check whether `worktree_path` is a functioning git worktree with the
    /// expected branch checked out. Used by the crash-recovery path: a stale
    /// or half-removed directory fails this check and gets recreated.
    pub fn worktree_is_valid(&self, worktree_path: &Path, branch: &str) -> bool {
        if !worktree_path.exists() {
            return false;
        }
        let Ok(repo) = Repository::open(worktree_path) else {
            return false;
        };
        let Ok(head) = repo.head() else {
            return false;
        };
        head.shorthand() == Some(branch)
    }

    /// Remove a worktree and clean up all associated resources.
    /// This function attempts cleanup even if some operations fail.
    /// It's critical that we fully disassociate the branch from the worktree,
    /// otherwise later deletion will fail with "branch is already checked out".
    pub fn remove_worktree(&self, worktree_path: &Path) -> Result<()> {
        clog_debug!("GitOps::remove_worktree path={}", worktree_path.display());
        let repo = self.repo()?;
        let worktrees = repo.worktrees()?;

        // Try to find the worktree by path (may fail due to path canonicalization)
        let worktree_name: Option<String> = worktrees
            .iter()
            .flatten()
            .find(|name| {
                repo.find_worktree(name)
                    .map(|wt| wt.path() == worktree_path)
                    .unwrap_or(false)
            })
            .map(|s| s.to_string());

        // Also try to find by folder name as fallback
        let folder_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());

        let worktree_name = worktree_name.or_else(|| {
            folder_name.as_ref().and_then(|fname| {
                worktrees
                    .iter()
                    .flatten()
                    .find(|name| *name == fname.as_str())
                    .map(|s| s.to_string())
            })
        });

        // Try to prune via git if worktree is known
        if let Some(ref name) = worktree_name {
            if let Ok(worktree) = repo.find_worktree(name) {
                clog_debug!("Unlocking and pruning worktree: {}", name);
                let _ = worktree.unlock();
                // Prune with valid=true to remove even valid worktrees
                let prune_result = worktree.prune(Some(
                    git2::WorktreePruneOptions::new()
                        .valid(true)
                        .working_tree(true)
                        .locked(true),
                ));
                if let Err(e) = prune_result {
                    clog_warn!("Worktree prune failed for '{}': {}", name, e);
                }
            }
        }

        // Always try to remove the worktree directory if it exists
        if worktree_path.exists() {
            clog_debug!("Removing worktree directory: {}", worktree_path.display());
            std::fs::remove_dir_all(worktree_path)?;
        }

        // Clean up the git worktree admin directory (e.g., .git/worktrees/<name>)
        // If the admin dir still exists, git thinks the branch is checked out.
        if let Some(ref name) = worktree_name {
            self.cleanup_worktree_admin_dir(name);
        }
        if let Some(ref fname) = folder_name {
            self.cleanup_worktree_admin_dir(fname);
        }

        drop(repo); // Release the repo handle
        self.prune_worktrees()?;

        clog_debug!("Worktree removed successfully");
        Ok(())
    }

    /// Clean up the git worktree admin directory (.git/worktrees/<name>)
    fn cleanup_worktree_admin_dir(&self, worktree_name: &str) {
        if let Ok(repo) = self.repo() {
            let git_dir = repo.path(); // This is the .git directory
            let admin_dir = git_dir.join("worktrees").join(worktree_name);
            if admin_dir.exists() {
                clog_debug!("Cleaning up worktree admin dir: {}", admin_dir.display());
                let _ = std::fs::remove_dir_all(&admin_dir);
            }
        }
    }

    /// Prune stale git worktree administrative files.
    /// This is important after removing worktree directories directly.
    pub fn prune_worktrees(&self) -> Result<()> {
        clog_debug!("GitOps::prune_worktrees");
        let repo = self.repo()?;
        let worktrees = repo.worktrees()?;

        for name in worktrees.iter().flatten() {
            if let Ok(wt) = repo.find_worktree(name) {
                if !wt.path().exists() {
                    clog_debug!("Pruning stale worktree reference: {}", name);
                    let _ = wt.prune(Some(
                        git2::WorktreePruneOptions::new()
                            .valid(true)
                            .working_tree(true)
                            .locked(true),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn list_worktrees(&self) -> Result<Vec<String>> {
        let repo = self.repo()?;
        Ok(repo
            .worktrees()?
            .iter()
            .flatten()
            .map(String::from)
            .collect())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let result = match repo.find_branch(branch, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        };
        result
    }

    /// List local branch names starting with `prefix`.
    pub fn branches_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let repo = self.repo()?;
        let mut out = Vec::new();
        for branch_result in repo.branches(Some(BranchType::Local))? {
            let Ok((branch, _)) = branch_result else {
                continue;
            };
            if let Ok(Some(name)) = branch.name() {
                if name.starts_with(prefix) {
                    out.push(name.to_string());
                }
            }
        }
        Ok(out)
    }

    /// Delete a local branch. Returns Ok even if the branch doesn't exist.
    /// Logs a warning if deletion fails for other reasons but doesn't error.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        clog_debug!("GitOps::delete_branch branch={}", branch);
        let repo = self.repo()?;
        match repo.find_branch(branch, BranchType::Local) {
            Ok(mut branch_ref) => {
                if let Err(e) = branch_ref.delete() {
                    // The branch might still be associated with a half-removed
                    // worktree. The worktree directory is what matters.
                    clog_warn!("Failed to delete branch '{}': {}", branch, e);
                } else {
                    clog_debug!("Branch deleted: {}", branch);
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                clog_debug!("Branch '{}' not found (already deleted?)", branch);
            }
            Err(e) => {
                clog_warn!("Error looking up branch '{}': {}", branch, e);
            }
        }
        Ok(())
    }

    /// Force delete a branch reference directly. Use when normal deletion fails.
    pub fn force_delete_branch_ref(&self, branch: &str) -> Result<()> {
        clog_debug!("GitOps::force_delete_branch_ref branch={}", branch);
        let repo = self.repo()?;
        let refname = format!("refs/heads/{}", branch);
        if let Ok(mut reference) = repo.find_reference(&refname) {
            let _ = reference.delete();
            clog_debug!("Force deleted branch ref: {}", refname);
        }
        Ok(())
    }

    /// Stage and commit everything in a working copy.
    /// Used to snapshot a worker's output before merging it back.
    pub fn commit_all(&self, workdir: &Path, message: &str) -> Result<()> {
        clog_debug!(
            "GitOps::commit_all path={} message={}",
            workdir.display(),
            message
        );
        let repo = Repository::open(workdir)?;
        let mut index = repo.index()?;
        index.add_all(["."].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Crew", "crew@localhost"))?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };

        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_id = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        clog_debug!("Commit created: {}", commit_id);
        Ok(())
    }

    /// Merge `source_branch` into `target_branch` inside the working copy at
    /// `workdir`, always creating a merge commit (non-fast-forward).
    ///
    /// The target branch is checked out in `workdir` first. On conflict the
    /// merge is aborted and the working copy restored to the target branch's
    /// pre-merge state; the caller decides what to do with the conflict.
    pub fn merge_no_ff(
        &self,
        workdir: &Path,
        target_branch: &str,
        source_branch: &str,
        message: &str,
    ) -> Result<MergeAttempt> {
        clog_debug!(
            "GitOps::merge_no_ff workdir={} target={} source={}",
            workdir.display(),
            target_branch,
            source_branch
        );
        let repo = Repository::open(workdir)?;

        // Check out the target branch in this working copy.
        let target_ref = repo
            .find_branch(target_branch, BranchType::Local)
            .map_err(|e| match e.code() {
                ErrorCode::NotFound => Error::BranchNotFound(target_branch.to_string()),
                _ => Error::Git(e),
            })?
            .into_reference();
        let target_commit = target_ref.peel_to_commit()?;
        let refname = format!("refs/heads/{}", target_branch);
        repo.set_head(&refname)?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;

        let source_commit = repo
            .find_branch(source_branch, BranchType::Local)
            .map_err(|e| match e.code() {
                ErrorCode::NotFound => Error::BranchNotFound(source_branch.to_string()),
                _ => Error::Git(e),
            })?
            .into_reference()
            .peel_to_commit()?;
        let annotated = repo.find_annotated_commit(source_commit.id())?;

        let (analysis, _preference) = repo.merge_analysis(&[&annotated])?;
        if analysis.is_up_to_date() {
            // Nothing to merge - target already contains the source
            return Ok(MergeAttempt::Merged {
                commit: target_commit.id().to_string(),
            });
        }

        // A merge commit is wanted even when fast-forward would be possible.
        let mut merge_opts = MergeOptions::new();
        repo.merge(&[&annotated], Some(&mut merge_opts), None)?;

        let index = repo.index()?;
        if index.has_conflicts() {
            let files = conflict_paths(&index);
            clog_warn!(
                "Merge of '{}' into '{}' conflicted on {} file(s), aborting",
                source_branch,
                target_branch,
                files.len()
            );
            // Abort: drop merge state and restore the pre-merge tree.
            repo.cleanup_state()?;
            repo.reset(
                target_commit.as_object(),
                git2::ResetType::Hard,
                None,
            )?;
            return Ok(MergeAttempt::Conflicted { files });
        }

        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Crew", "crew@localhost"))?;
        let mut index = repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let commit_id = repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            message,
            &tree,
            &[&target_commit, &source_commit],
        )?;
        repo.cleanup_state()?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;

        clog_debug!("Merge commit created: {}", commit_id);
        Ok(MergeAttempt::Merged {
            commit: commit_id.to_string(),
        })
    }

    /// Number of commits on `branch` that are not on `base_branch`.
    pub fn commit_count(&self, base_branch: &str, branch: &str) -> Result<usize> {
        let repo = self.repo()?;
        let branch_commit = repo
            .find_branch(branch, BranchType::Local)?
            .into_reference()
            .peel_to_commit()?;
        let base_commit = repo
            .find_branch(base_branch, BranchType::Local)?
            .into_reference()
            .peel_to_commit()?;

        let mut walk = repo.revwalk()?;
        walk.push(branch_commit.id())?;
        walk.hide(base_commit.id())?;
        Ok(walk.count())
    }

    /// Files changed / insertions / deletions between the tips of two branches.
    pub fn diff_stats(&self, base_branch: &str, branch: &str) -> Result<(usize, usize, usize)> {
        let repo = self.repo()?;
        let base_tree = repo
            .find_branch(base_branch, BranchType::Local)?
            .into_reference()
            .peel_to_commit()?
            .tree()?;
        let branch_tree = repo
            .find_branch(branch, BranchType::Local)?
            .into_reference()
            .peel_to_commit()?
            .tree()?;
        let diff = repo.diff_tree_to_tree(Some(&base_tree), Some(&branch_tree), None)?;
        let stats = diff.stats()?;
        Ok((stats.files_changed(), stats.insertions(), stats.deletions()))
    }

    /// Check if a working copy has uncommitted changes using git status --porcelain.
    /// Returns false if the path doesn't exist or isn't a git repository.
    pub fn is_worktree_dirty(worktree_path: &Path) -> bool {
        if !worktree_path.exists() {
            return false;
        }

        let output = std::process::Command::new("git")
            .arg("status")
            .arg("--porcelain")
            .current_dir(worktree_path)
            .output();

        match output {
            Ok(output) => !output.stdout.is_empty(),
            Err(_) => false,
        }
    }
}

fn conflict_paths(index: &git2::Index) -> Vec<String> {
    let Ok(conflicts) = index.conflicts() else {
        return Vec::new();
    };
    let mut files = Vec::new();
    for conflict in conflicts.flatten() {
        let path = conflict
            .our
            .as_ref()
            .or(conflict.their.as_ref())
            .or(conflict.ancestor.as_ref())
            .map(|e| String::from_utf8_lossy(&e.path).to_string());
        if let Some(path) = path {
            files.push(path);
        }
    }
    files.sort();
    files.dedup();
    files
}
