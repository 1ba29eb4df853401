//! Progress snapshot for external observability.
//!
//! The coordinator writes a JSON snapshot of active workers and claimed
//! files after every claim and release, so a UI or a second shell can see
//! what the run is doing without attaching to the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordination::scheduler::ChunkScheduler;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProgress {
    pub worker: String,
    pub phase: u32,
    pub chunk: String,
    pub branch: String,
    pub worktree: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub spec: String,
    pub updated_at: DateTime<Utc>,
    pub workers: Vec<WorkerProgress>,
    /// Claimed file path -> short worker id.
    pub claimed_files: BTreeMap<String, String>,
}

impl ProgressSnapshot {
    pub fn capture(spec: &str, scheduler: &ChunkScheduler) -> Self {
        let mut workers: Vec<WorkerProgress> = scheduler
            .assignments()
            .map(|a| WorkerProgress {
                worker: a.worker.short(),
                phase: a.phase,
                chunk: a.chunk.to_string(),
                branch: a.branch.clone(),
                worktree: a.worktree.clone(),
                started_at: a.started_at,
            })
            .collect();
        workers.sort_by(|a, b| a.worker.cmp(&b.worker));

        let claimed_files = scheduler
            .claimed_files()
            .iter()
            .map(|(path, worker)| (path.clone(), worker.short()))
            .collect();

        Self {
            spec: spec.to_string(),
            updated_at: Utc::now(),
            workers,
            claimed_files,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}
