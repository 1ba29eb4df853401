//! Dependency-aware chunk scheduling with file-level claims.
//!
//! The scheduler hands out chunks whose phase dependencies are satisfied
//! and whose file footprints are disjoint from every file currently claimed
//! by a running worker. All registry mutation happens behind one lock held
//! by the coordinator, so claim/release are plain synchronous methods: the
//! lock is the single serialization point.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::chunk::{ChunkId, ChunkStatus};
use crate::core::plan::Plan;
use crate::{clog_debug, clog_warn};

/// Unique identifier for a worker within a coordination run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display and naming.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    Completed,
    Failed,
}

/// A worker's current assignment: which chunk it holds, where it works,
/// and on which branch. Created at claim time, destroyed at release time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub worker: WorkerId,
    pub phase: u32,
    pub chunk: ChunkId,
    pub branch: String,
    pub worktree: PathBuf,
    pub status: WorkerStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A chunk the scheduler is offering, with enough context to claim it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableChunk {
    pub phase: u32,
    pub chunk: ChunkId,
    pub description: String,
}

/// Tracks the plan, the claimed-files registry, and worker assignments.
///
/// Invariant: every claimed path maps to at most one worker, so the file
/// sets of concurrently running chunks are pairwise disjoint.
pub struct ChunkScheduler {
    plan: Plan,
    claimed: HashMap<String, WorkerId>,
    assignments: HashMap<WorkerId, WorkerAssignment>,
}

impl ChunkScheduler {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            claimed: HashMap::new(),
            assignments: HashMap::new(),
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Files currently claimed, keyed by path.
    pub fn claimed_files(&self) -> &HashMap<String, WorkerId> {
        &self.claimed
    }

    pub fn assignments(&self) -> impl Iterator<Item = &WorkerAssignment> {
        self.assignments.values()
    }

    pub fn active_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn all_finished(&self) -> bool {
        self.plan.all_finished()
    }

    fn chunk_is_assigned(&self, chunk: &ChunkId) -> bool {
        self.assignments.values().any(|a| &a.chunk == chunk)
    }

    fn files_are_free(&self, footprint: &std::collections::BTreeSet<String>) -> bool {
        footprint.iter().all(|f| !self.claimed.contains_key(f))
    }

    /// Chunks that may start right now, in phase/array scan order (FIFO).
    ///
    /// A chunk qualifies when its phase's every dependency phase is fully
    /// completed, it is Pending, not already assigned, and its file
    /// footprint is disjoint from every currently claimed file. This is an
    /// optimistic, non-blocking check: if two callers race, at most one
    /// [`Self::claim_chunk`] succeeds.
    pub fn available_chunks(&self) -> Vec<AvailableChunk> {
        let mut available = Vec::new();
        for phase in &self.plan.phases {
            if !self.plan.deps_satisfied(phase) {
                continue;
            }
            for chunk in &phase.chunks {
                if chunk.status != ChunkStatus::Pending {
                    continue;
                }
                if self.chunk_is_assigned(&chunk.id) {
                    continue;
                }
                if !self.files_are_free(&chunk.footprint()) {
                    continue;
                }
                available.push(AvailableChunk {
                    phase: phase.number,
                    chunk: chunk.id.clone(),
                    description: chunk.description.clone(),
                });
            }
        }
        available
    }

    /// Claim a chunk for a worker.
    ///
    /// Re-validates the availability conditions against the registry and,
    /// on success, records the chunk's files as claimed by the worker and
    /// transitions the chunk to InProgress. On failure returns false with
    /// no side effects; callers simply pick a different chunk.
    pub fn claim_chunk(
        &mut self,
        worker: WorkerId,
        phase: u32,
        chunk_id: &ChunkId,
        worktree: PathBuf,
        branch: String,
    ) -> bool {
        let Some(chunk) = self.plan.phase(phase).and_then(|p| {
            p.chunks.iter().find(|c| &c.id == chunk_id)
        }) else {
            clog_warn!("claim_chunk: unknown chunk {} in phase {}", chunk_id, phase);
            return false;
        };

        if chunk.status != ChunkStatus::Pending || self.chunk_is_assigned(chunk_id) {
            clog_debug!("claim_chunk: {} already taken", chunk_id);
            return false;
        }
        let footprint = chunk.footprint();
        if !self.files_are_free(&footprint) {
            clog_debug!("claim_chunk: files for {} overlap a running worker", chunk_id);
            return false;
        }

        for file in &footprint {
            self.claimed.insert(file.clone(), worker);
        }
        self.assignments.insert(
            worker,
            WorkerAssignment {
                worker,
                phase,
                chunk: chunk_id.clone(),
                branch,
                worktree,
                status: WorkerStatus::Working,
                started_at: Utc::now(),
                ended_at: None,
            },
        );
        if let Some(chunk) = self.plan.chunk_mut(chunk_id) {
            chunk.start();
        }
        clog_debug!(
            "claim_chunk: worker {} claimed {} ({} files)",
            worker.short(),
            chunk_id,
            footprint.len()
        );
        true
    }

    /// Release a worker's claim.
    ///
    /// Unconditionally frees every file claimed by the worker and removes
    /// its assignment, then records the chunk's terminal status, completion
    /// timestamp, and output. Called from both the success and the failure
    /// path; safe to call once per worker per chunk.
    pub fn release_chunk(
        &mut self,
        worker: WorkerId,
        chunk_id: &ChunkId,
        success: bool,
        output: Option<String>,
    ) {
        self.claimed.retain(|_, holder| *holder != worker);
        if self.assignments.remove(&worker).is_none() {
            clog_warn!(
                "release_chunk: worker {} had no assignment",
                worker.short()
            );
        }

        match self.plan.chunk_mut(chunk_id) {
            Some(chunk) => chunk.finish(success, output),
            None => clog_warn!("release_chunk: unknown chunk {}", chunk_id),
        }
        clog_debug!(
            "release_chunk: worker {} released {} success={}",
            worker.short(),
            chunk_id,
            success
        );
    }
}
