//! Interface to the external agent-execution collaborator.
//!
//! The coordinator hands each worker's worktree path and task description
//! to an [`AgentInvoker`] and waits for a status plus output text. Only
//! "continue" and "complete" statuses count as success; everything else is
//! treated as a failed chunk. The agent's own behavior (prompting, retries,
//! tool use) is entirely outside this crate.

use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::{clog_debug, Error, Result};

/// Status reported by an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// The agent made progress and could take another pass.
    Continue,
    /// The agent considers the task done.
    Complete,
    /// The agent gave up or hit an error.
    Error,
}

impl AgentStatus {
    /// Only Continue and Complete count as a successful run.
    pub fn is_success(&self) -> bool {
        matches!(self, AgentStatus::Continue | AgentStatus::Complete)
    }

    /// Parse a status word from agent output, defaulting to Error for
    /// anything unrecognized.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "continue" => AgentStatus::Continue,
            "complete" | "completed" | "done" => AgentStatus::Complete,
            _ => AgentStatus::Error,
        }
    }
}

/// Result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub status: AgentStatus,
    pub output: String,
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// The seam for agent execution.
///
/// Implementations run a long-lived coding agent against `workspace` with
/// `task` as its instruction and report back when it exits.
pub trait AgentInvoker: Send + Sync + 'static {
    fn invoke(
        &self,
        workspace: &Path,
        task: &str,
    ) -> impl Future<Output = Result<AgentOutcome>> + Send;
}

/// Default invoker: spawns the configured CLI inside the workspace and
/// captures its output. Exit code 0 maps to Complete, anything else to
/// Error.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    base_command: Vec<String>,
}

impl CommandAgent {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_command: config
                .effective_agent_command()
                .split_whitespace()
                .map(String::from)
                .collect(),
        }
    }

    pub fn binary(&self) -> &str {
        self.base_command
            .first()
            .map(|s| s.as_str())
            .unwrap_or("claude")
    }

    pub fn is_available(&self) -> bool {
        which::which(self.binary()).is_ok()
    }

    /// Fail early if the agent binary cannot be found on PATH.
    pub fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::AgentNotAvailable(self.binary().to_string()))
        }
    }

    fn command(&self, task: &str) -> Vec<String> {
        let mut cmd = self.base_command.clone();
        cmd.push(task.to_string());
        cmd
    }
}

impl Default for CommandAgent {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl AgentInvoker for CommandAgent {
    async fn invoke(&self, workspace: &Path, task: &str) -> Result<AgentOutcome> {
        let cmd = self.command(task);
        let Some((program, args)) = cmd.split_first() else {
            return Err(Error::AgentNotAvailable("<empty command>".to_string()));
        };
        clog_debug!(
            "CommandAgent::invoke workspace={} cmd={:?}",
            workspace.display(),
            cmd
        );
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(workspace)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let status = if output.status.success() {
            AgentStatus::Complete
        } else {
            AgentStatus::Error
        };
        let text = if stderr.is_empty() {
            stdout
        } else {
            format!("{}\n{}", stdout, stderr)
        };
        clog_debug!("CommandAgent::invoke finished status={:?}", status);
        Ok(AgentOutcome {
            status,
            output: text,
        })
    }
}
