//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary git repositories
//! - Building plans and schedulers
//! - A scripted agent that writes files instead of calling a real model

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use crew::agent::{AgentInvoker, AgentOutcome, AgentStatus};
use crew::config::Config;
use crew::core::chunk::Chunk;
use crew::core::plan::{Phase, Plan};
use crew::coordination::WorktreeManager;
use crew::git::GitOps;

/// A test repository with a temporary directory and initialized git.
pub struct TestRepo {
    /// The temporary directory containing the repo.
    pub temp_dir: TempDir,
    /// Path to the repository root.
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new test repository with an initial commit on `main`.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();

        Command::new("git")
            .args(["init", "-b", "main"])
            .current_dir(&path)
            .output()
            .expect("Failed to init git");

        Command::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(&path)
            .output()
            .expect("Failed to set user.email");

        Command::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(&path)
            .output()
            .expect("Failed to set user.name");

        std::fs::write(path.join("README.md"), "# Test Repository\n")
            .expect("Failed to write README");
        // Worktrees live inside the repo; keep them out of git status.
        std::fs::write(path.join(".gitignore"), ".worktrees/\ncrew.toml\n")
            .expect("Failed to write .gitignore");

        Command::new("git")
            .args(["add", "."])
            .current_dir(&path)
            .output()
            .expect("Failed to git add");

        Command::new("git")
            .args(["commit", "-m", "Initial commit"])
            .current_dir(&path)
            .output()
            .expect("Failed to git commit");

        Self { temp_dir, path }
    }

    /// Create a file and commit it in an arbitrary working copy.
    pub fn commit_file_in(
        workdir: &Path,
        filename: &str,
        content: &str,
        message: &str,
    ) -> std::io::Result<()> {
        let file_path = workdir.join(filename);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&file_path, content)?;

        Command::new("git")
            .args(["add", "."])
            .current_dir(workdir)
            .output()?;

        Command::new("git")
            .args(["commit", "-m", message])
            .current_dir(workdir)
            .output()?;
        Ok(())
    }

    /// Create a file and commit it in the main working copy.
    pub fn create_and_commit(
        &self,
        filename: &str,
        content: &str,
        message: &str,
    ) -> std::io::Result<()> {
        Self::commit_file_in(&self.path, filename, content, message)
    }

    /// Check if a branch exists.
    pub fn branch_exists(&self, name: &str) -> bool {
        let output = Command::new("git")
            .args(["branch", "--list", name])
            .current_dir(&self.path)
            .output()
            .expect("Failed to list branches");

        !String::from_utf8_lossy(&output.stdout).trim().is_empty()
    }

    /// Output of `git status --porcelain` in the main working copy.
    pub fn porcelain_status(&self) -> String {
        let output = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&self.path)
            .output()
            .expect("Failed to run git status");
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    pub fn config(&self) -> Config {
        Config::default()
    }

    pub fn worktree_manager(&self) -> crew::Result<WorktreeManager> {
        WorktreeManager::new(&self.path, &self.config())
    }

    pub fn git_ops(&self) -> crew::Result<GitOps> {
        GitOps::new(&self.path)
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a chunk whose description the ScriptedAgent understands.
pub fn file_chunk(id: &str, file: &str) -> Chunk {
    Chunk::new(id, &format!("create:{}", file)).with_create([file])
}

/// Create a phase with the given number, dependencies, and chunks.
pub fn phase_with(number: u32, deps: &[u32], chunks: Vec<Chunk>) -> Phase {
    let mut phase = Phase::new(number, &format!("phase-{}", number));
    phase.depends_on = deps.to_vec();
    phase.chunks = chunks;
    phase
}

pub fn plan_with(phases: Vec<Phase>) -> Plan {
    Plan::new(phases).expect("Failed to build test plan")
}

/// Agent double for coordinator tests.
///
/// Understands task descriptions of the form `create:<relative-path>` and
/// writes that file into the workspace. Chunks listed in `fail_on` report
/// an error status without touching the workspace.
#[derive(Clone, Default)]
pub struct ScriptedAgent {
    fail_on: HashSet<String>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fail_on: files.into_iter().map(Into::into).collect(),
        }
    }
}

impl AgentInvoker for ScriptedAgent {
    async fn invoke(&self, workspace: &Path, task: &str) -> crew::Result<AgentOutcome> {
        let Some(file) = task.strip_prefix("create:") else {
            return Ok(AgentOutcome {
                status: AgentStatus::Error,
                output: format!("unknown task: {}", task),
            });
        };

        if self.fail_on.contains(file) {
            return Ok(AgentOutcome {
                status: AgentStatus::Error,
                output: format!("scripted failure for {}", file),
            });
        }

        let path = workspace.join(file);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, format!("content of {}\n", file)).await?;
        Ok(AgentOutcome {
            status: AgentStatus::Complete,
            output: format!("created {}", file),
        })
    }
}
