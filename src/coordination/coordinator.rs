//! The coordination run loop.
//!
//! A single cooperative loop drives up to `max_workers` concurrently
//! in-flight worker tasks. Each worker task suspends while its agent runs
//! and while waiting for the merge lock; all claim/release bookkeeping goes
//! through the scheduler's RwLock between suspension points, so the
//! registries have exactly one serialization point.
//!
//! One coordinator process per project is a hard constraint. A second
//! process is tolerated only at the filesystem layer: the PID-stamped locks
//! serialize merges, and an overlapping edit surfaces as a git-level
//! conflict that fails the chunk instead of corrupting the spec branch.

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentInvoker;
use crate::config::Config;
use crate::coordination::merge::{MergeCoordinator, CONFLICT_REASON};
use crate::coordination::progress::ProgressSnapshot;
use crate::coordination::scheduler::{ChunkScheduler, WorkerId};
use crate::coordination::worktree::{MergeOutcome, WorktreeManager};
use crate::core::chunk::{ChunkId, ChunkStatus};
use crate::core::plan::Plan;
use crate::{clog, clog_debug, clog_error, clog_warn, util, Result};

/// What one worker task reports back to the loop.
#[derive(Debug)]
struct WorkerOutcome {
    worker: WorkerId,
    chunk: ChunkId,
    success: bool,
    output: Option<String>,
}

/// Final tally of a coordination run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: Vec<ChunkId>,
    pub failed: Vec<ChunkId>,
    /// Chunks that never ran: their dependencies can no longer complete,
    /// or the run was cancelled first.
    pub skipped: Vec<ChunkId>,
}

impl RunSummary {
    fn from_plan(plan: &Plan) -> Self {
        let mut summary = Self::default();
        for chunk in plan.phases.iter().flat_map(|p| p.chunks.iter()) {
            match chunk.status {
                ChunkStatus::Completed => summary.completed.push(chunk.id.clone()),
                ChunkStatus::Failed => summary.failed.push(chunk.id.clone()),
                ChunkStatus::Pending | ChunkStatus::InProgress => {
                    summary.skipped.push(chunk.id.clone())
                }
            }
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Drives one spec's plan to completion with a pool of agent workers.
pub struct Coordinator<A: AgentInvoker> {
    config: Config,
    project_root: PathBuf,
    spec: String,
    scheduler: Arc<RwLock<ChunkScheduler>>,
    worktrees: WorktreeManager,
    merges: Arc<MergeCoordinator>,
    agent: Arc<A>,
    /// Where to write chunk status back for the planning collaborator.
    plan_path: Option<PathBuf>,
    cancel: CancellationToken,
}

impl<A: AgentInvoker> Coordinator<A> {
    pub fn new(
        config: Config,
        project_root: PathBuf,
        spec: &str,
        plan: Plan,
        agent: A,
    ) -> Result<Self> {
        let worktrees = WorktreeManager::new(&project_root, &config)?;
        let merges = MergeCoordinator::new(
            config.locks_dir(&project_root),
            config.lock_timeout(),
            worktrees.clone(),
        );
        Ok(Self {
            config,
            project_root,
            spec: spec.to_string(),
            scheduler: Arc::new(RwLock::new(ChunkScheduler::new(plan))),
            worktrees,
            merges: Arc::new(merges),
            agent: Arc::new(agent),
            plan_path: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Persist chunk status back into the plan file after every release.
    pub fn with_plan_path(mut self, path: PathBuf) -> Self {
        self.plan_path = Some(path);
        self
    }

    /// Token callers can use to stop the loop (e.g. on ctrl-c). In-flight
    /// worker tasks are not interrupted; they are abandoned and their
    /// worktrees swept by the final cleanup.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn scheduler(&self) -> Arc<RwLock<ChunkScheduler>> {
        Arc::clone(&self.scheduler)
    }

    /// Run the loop until the plan is finished, progress is impossible, or
    /// the run is cancelled. Worker-worktree cleanup always runs, whatever
    /// the loop's outcome.
    pub async fn run(&self) -> Result<RunSummary> {
        self.config.ensure_dirs(&self.project_root)?;
        let result = self.run_inner().await;

        // Final teardown runs on every exit path, bounding resource growth
        // across long-lived coordination runs.
        let worktrees = self.worktrees.clone();
        let removed = util::blocking(move || Ok(worktrees.cleanup_all_workers())).await?;
        clog_debug!("Final cleanup removed {} worker worktrees", removed);

        match result {
            Ok(()) => {}
            Err(e) => {
                clog_error!("Coordination run failed: {}", e);
                return Err(e);
            }
        }

        let summary = {
            let scheduler = self.scheduler.read().await;
            RunSummary::from_plan(scheduler.plan())
        };
        clog!(
            "Run finished for spec '{}': {} completed, {} failed, {} skipped",
            self.spec,
            summary.completed.len(),
            summary.failed.len(),
            summary.skipped.len()
        );
        Ok(summary)
    }

    async fn run_inner(&self) -> Result<()> {
        let spec = self.spec.clone();
        let worktrees = self.worktrees.clone();
        util::blocking(move || worktrees.get_or_create_spec_worktree(&spec).map(|_| ())).await?;

        let mut in_flight: FuturesUnordered<tokio::task::JoinHandle<WorkerOutcome>> =
            FuturesUnordered::new();

        loop {
            if self.cancel.is_cancelled() {
                clog!("Run cancelled, abandoning {} in-flight workers", in_flight.len());
                break;
            }

            while in_flight.len() < self.config.max_workers {
                match self.spawn_next_worker().await? {
                    Some(handle) => in_flight.push(handle),
                    None => break,
                }
            }

            if in_flight.is_empty() {
                if self.scheduler.read().await.all_finished() {
                    break;
                }
                // Nothing running and nothing claimable. Idle briefly and
                // look again; if the picture hasn't changed the remaining
                // chunks are permanently blocked (a dependency failed) and
                // the loop would otherwise spin forever.
                tokio::time::sleep(self.config.idle_delay()).await;
                let scheduler = self.scheduler.read().await;
                if scheduler.available_chunks().is_empty() && !scheduler.all_finished() {
                    clog_warn!(
                        "No runnable chunks remain for spec '{}'; ending run",
                        self.spec
                    );
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => continue,
                outcome = in_flight.next() => {
                    if let Some(outcome) = outcome {
                        let outcome =
                            outcome.map_err(|e| crate::Error::TaskJoin(e.to_string()))?;
                        self.handle_outcome(outcome).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Claim the first available chunk and start a worker for it.
    /// Returns None when nothing is claimable right now.
    async fn spawn_next_worker(&self) -> Result<Option<tokio::task::JoinHandle<WorkerOutcome>>> {
        let available = self.scheduler.read().await.available_chunks();

        for candidate in available {
            let worker = WorkerId::new();
            let branch = self.worktrees.worker_branch(&worker);
            let path = self.worktrees.worker_worktree_path(&worker);

            let claimed = self.scheduler.write().await.claim_chunk(
                worker,
                candidate.phase,
                &candidate.chunk,
                path.clone(),
                branch.clone(),
            );
            if !claimed {
                // Lost the optimistic race; try the next candidate.
                continue;
            }

            let spec = self.spec.clone();
            let worktrees = self.worktrees.clone();
            let worker_copy = worker;
            let created = util::blocking(move || {
                worktrees.create_worker_worktree(&spec, &worker_copy)
            })
            .await;

            if let Err(e) = created {
                clog_error!(
                    "Failed to create worktree for worker {}: {}",
                    worker.short(),
                    e
                );
                self.handle_outcome(WorkerOutcome {
                    worker,
                    chunk: candidate.chunk.clone(),
                    success: false,
                    output: Some(format!("worktree creation failed: {}", e)),
                })
                .await?;
                continue;
            }

            self.write_progress().await;
            clog!(
                "Worker {} started on chunk {} (phase {})",
                worker.short(),
                candidate.chunk,
                candidate.phase
            );

            let agent = Arc::clone(&self.agent);
            let merges = Arc::clone(&self.merges);
            let worktrees = self.worktrees.clone();
            let spec = self.spec.clone();
            let chunk = candidate.chunk.clone();
            let description = candidate.description.clone();
            let handle = tokio::spawn(run_worker(
                agent, merges, worktrees, spec, worker, chunk, description, path,
            ));
            return Ok(Some(handle));
        }

        Ok(None)
    }

    async fn handle_outcome(&self, outcome: WorkerOutcome) -> Result<()> {
        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.release_chunk(
                outcome.worker,
                &outcome.chunk,
                outcome.success,
                outcome.output,
            );
        }
        clog!(
            "Worker {} finished chunk {} success={}",
            outcome.worker.short(),
            outcome.chunk,
            outcome.success
        );
        self.write_progress().await;
        self.save_plan().await;
        Ok(())
    }

    async fn write_progress(&self) {
        let snapshot = {
            let scheduler = self.scheduler.read().await;
            ProgressSnapshot::capture(&self.spec, &scheduler)
        };
        let path = self.config.progress_path(&self.project_root);
        if let Err(e) = snapshot.write(&path) {
            clog_warn!("Failed to write progress snapshot: {}", e);
        }
    }

    /// Write chunk status/timestamps back into the plan file.
    async fn save_plan(&self) {
        let Some(path) = &self.plan_path else { return };
        let scheduler = self.scheduler.read().await;
        if let Err(e) = scheduler.plan().save(path) {
            clog_warn!("Failed to save plan to {}: {}", path.display(), e);
        }
    }
}

/// One worker's life: run the agent in its worktree, then hand the branch
/// to the merge coordinator. The merge coordinator destroys the worktree
/// whatever happens; when the agent itself fails the worker tears its
/// worktree down directly and skips the merge.
#[allow(clippy::too_many_arguments)]
async fn run_worker<A: AgentInvoker>(
    agent: Arc<A>,
    merges: Arc<MergeCoordinator>,
    worktrees: WorktreeManager,
    spec: String,
    worker: WorkerId,
    chunk: ChunkId,
    description: String,
    worktree_path: PathBuf,
) -> WorkerOutcome {
    let agent_result = agent.invoke(&worktree_path, &description).await;

    let (success, output) = match agent_result {
        Ok(agent_outcome) if agent_outcome.is_success() => {
            let message = format!("{}: {}", chunk, description);
            match merges.merge_worker(&spec, worker, &message).await {
                Ok(MergeOutcome::Merged { .. }) => (true, Some(agent_outcome.output)),
                Ok(MergeOutcome::AbortedOnConflict { .. }) => {
                    (false, Some(CONFLICT_REASON.to_string()))
                }
                Ok(MergeOutcome::NotFound { branch }) => {
                    (false, Some(format!("worker branch '{}' missing", branch)))
                }
                Err(e) => (false, Some(format!("merge failed: {}", e))),
            }
        }
        Ok(agent_outcome) => {
            remove_worker_worktree(&worktrees, worker).await;
            (false, Some(agent_outcome.output))
        }
        Err(e) => {
            remove_worker_worktree(&worktrees, worker).await;
            (false, Some(format!("agent invocation failed: {}", e)))
        }
    };

    WorkerOutcome {
        worker,
        chunk,
        success,
        output,
    }
}

async fn remove_worker_worktree(worktrees: &WorktreeManager, worker: WorkerId) {
    let worktrees = worktrees.clone();
    let result = util::blocking(move || worktrees.remove_worker_worktree(&worker)).await;
    if let Err(e) = result {
        clog_warn!("Failed to remove worker {} worktree: {}", worker.short(), e);
    }
}
