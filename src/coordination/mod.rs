//! Coordination layer: scheduling, worktrees, locks, and the run loop.

pub mod coordinator;
pub mod lock;
pub mod merge;
pub mod progress;
pub mod scheduler;
pub mod worktree;

pub use coordinator::{Coordinator, RunSummary};
pub use lock::{FileLock, ProcessProbe, SpecNumbering, SystemProcessProbe};
pub use merge::{MergeCoordinator, CONFLICT_REASON};
pub use progress::ProgressSnapshot;
pub use scheduler::{AvailableChunk, ChunkScheduler, WorkerAssignment, WorkerId, WorkerStatus};
pub use worktree::{DiffStats, MergeOutcome, WorktreeInfo, WorktreeManager};
