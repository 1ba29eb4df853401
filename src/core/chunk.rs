//! Chunk data model.
//!
//! Chunks are the atomic units of schedulable work within a phase. Each
//! chunk declares its file footprint up front so the scheduler can keep
//! concurrent workers on disjoint sets of files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique identifier for a chunk within a plan.
///
/// Chunk ids are authored by the planning component, so this is a string
/// newtype rather than a generated UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub String);

impl ChunkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChunkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Chunk status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Chunk created but not yet claimed by a worker.
    #[default]
    Pending,
    /// Chunk claimed and being worked on.
    InProgress,
    /// Chunk completed and merged successfully.
    Completed,
    /// Chunk failed (agent error or merge conflict).
    Failed,
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkStatus::Pending => write!(f, "pending"),
            ChunkStatus::InProgress => write!(f, "in_progress"),
            ChunkStatus::Completed => write!(f, "completed"),
            ChunkStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A single unit of schedulable work.
///
/// The file footprint (`files_to_modify` ∪ `files_to_create`) is the claim
/// the scheduler makes on the chunk's behalf; two chunks with intersecting
/// footprints never run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier for this chunk.
    pub id: ChunkId,
    /// What the worker should accomplish.
    pub description: String,
    /// Existing files the chunk will modify (paths relative to the repo root).
    #[serde(default)]
    pub files_to_modify: BTreeSet<String>,
    /// New files the chunk will create.
    #[serde(default)]
    pub files_to_create: BTreeSet<String>,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: ChunkStatus,
    /// When a worker claimed the chunk.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the chunk reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Output text from the worker's agent run, recorded at release time.
    #[serde(default)]
    pub output: Option<String>,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, description: &str) -> Self {
        Self {
            id: id.into(),
            description: description.to_string(),
            files_to_modify: BTreeSet::new(),
            files_to_create: BTreeSet::new(),
            status: ChunkStatus::Pending,
            started_at: None,
            completed_at: None,
            output: None,
        }
    }

    /// Builder-style helper for declaring the files the chunk will modify.
    pub fn with_modify<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_to_modify = files.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style helper for declaring the files the chunk will create.
    pub fn with_create<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_to_create = files.into_iter().map(Into::into).collect();
        self
    }

    /// All files the chunk touches: modify ∪ create.
    pub fn footprint(&self) -> BTreeSet<String> {
        self.files_to_modify
            .union(&self.files_to_create)
            .cloned()
            .collect()
    }

    /// Transition to InProgress and record the start time.
    pub fn start(&mut self) {
        self.status = ChunkStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    /// Transition to a terminal state with the worker's output.
    pub fn finish(&mut self, success: bool, output: Option<String>) {
        self.status = if success {
            ChunkStatus::Completed
        } else {
            ChunkStatus::Failed
        };
        self.completed_at = Some(Utc::now());
        self.output = output;
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, ChunkStatus::Completed | ChunkStatus::Failed)
    }
}
