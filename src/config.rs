use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{clog_debug, Result};

fn default_max_workers() -> usize {
    3
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_worktree_dir() -> String {
    ".worktrees".to_string()
}

fn default_specs_dir() -> String {
    "specs".to_string()
}

fn default_lock_timeout_secs() -> u64 {
    30
}

fn default_idle_delay_ms() -> u64 {
    500
}

/// Project-level configuration, read from `crew.toml` at the project root.
///
/// Every field has a default so a project without a config file works out
/// of the box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of workers running concurrently.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Branch that spec worktrees are created from.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Directory (relative to the project root) holding all worktrees.
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: String,
    /// Directory (relative to the project root) holding `NNN-name` spec dirs.
    #[serde(default = "default_specs_dir")]
    pub specs_dir: String,
    /// Wall-clock bound on acquiring a filesystem lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// How long the coordinator idles when no chunk is available.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    /// Command used to invoke the coding agent in a worker's worktree.
    pub agent_command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            base_branch: default_base_branch(),
            worktree_dir: default_worktree_dir(),
            specs_dir: default_specs_dir(),
            lock_timeout_secs: default_lock_timeout_secs(),
            idle_delay_ms: default_idle_delay_ms(),
            agent_command: None,
        }
    }
}

impl Config {
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join("crew.toml")
    }

    pub fn effective_agent_command(&self) -> &str {
        self.agent_command.as_deref().unwrap_or("claude")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn worktrees_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.worktree_dir)
    }

    /// Lock files live inside the worktree dir so everything the coordinator
    /// owns sits under one directory.
    pub fn locks_dir(&self, project_root: &Path) -> PathBuf {
        self.worktrees_dir(project_root).join(".locks")
    }

    pub fn specs_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.specs_dir)
    }

    pub fn progress_path(&self, project_root: &Path) -> PathBuf {
        self.worktrees_dir(project_root).join("progress.json")
    }

    pub fn load(project_root: &Path) -> Result<Self> {
        let path = Self::config_path(project_root);
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        clog_debug!(
            "Config loaded: max_workers={}, base_branch={}, agent_command={:?}",
            config.max_workers,
            config.base_branch,
            config.agent_command
        );
        Ok(config)
    }

    pub fn save(&self, project_root: &Path) -> Result<()> {
        let path = Self::config_path(project_root);
        clog_debug!("Config::save path={}", path.display());
        fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn ensure_dirs(&self, project_root: &Path) -> Result<()> {
        let worktrees = self.worktrees_dir(project_root);
        let locks = self.locks_dir(project_root);
        clog_debug!(
            "Config::ensure_dirs worktrees={} locks={}",
            worktrees.display(),
            locks.display()
        );
        if !worktrees.exists() {
            fs::create_dir_all(&worktrees)?;
        }
        if !locks.exists() {
            fs::create_dir_all(&locks)?;
        }
        Ok(())
    }
}
