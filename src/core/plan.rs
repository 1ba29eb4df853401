//! Plan and phase data model with construction-time validation.
//!
//! A plan is a DAG of phases, each holding an ordered list of chunks and a
//! list of prerequisite phase numbers. Plans are authored externally and
//! read from JSON; validation runs once at construction time so authoring
//! mistakes fail fast instead of surfacing mid-run.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::core::chunk::{Chunk, ChunkId};
use crate::{Error, Result};

/// An ordered group of chunks sharing dependency prerequisites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// Phase number, unique within the plan.
    pub number: u32,
    /// Human-readable phase name.
    pub name: String,
    /// Phase numbers that must be fully completed before this phase runs.
    #[serde(default)]
    pub depends_on: Vec<u32>,
    /// Chunks in FIFO scheduling order.
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

impl Phase {
    pub fn new(number: u32, name: &str) -> Self {
        Self {
            number,
            name: name.to_string(),
            depends_on: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Union of every chunk's modify/create footprint.
    pub fn file_union(&self) -> BTreeSet<String> {
        let mut union = BTreeSet::new();
        for chunk in &self.chunks {
            union.extend(chunk.footprint());
        }
        union
    }

    /// A phase is complete when every chunk is Completed.
    pub fn is_complete(&self) -> bool {
        self.chunks
            .iter()
            .all(|c| c.status == crate::core::chunk::ChunkStatus::Completed)
    }

    /// A phase with a Failed chunk can never become complete (this layer
    /// does not retry).
    pub fn has_failed_chunk(&self) -> bool {
        self.chunks
            .iter()
            .any(|c| c.status == crate::core::chunk::ChunkStatus::Failed)
    }
}

/// A DAG of phases, read from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub phases: Vec<Phase>,
}

impl Plan {
    /// Build a plan and validate it. All construction paths funnel through
    /// here so an invalid plan cannot exist.
    pub fn new(phases: Vec<Phase>) -> Result<Self> {
        let plan = Self { phases };
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let plan: Self = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Write the plan (including chunk status and timestamps) back to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn phase(&self, number: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.number == number)
    }

    pub fn phase_mut(&mut self, number: u32) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.number == number)
    }

    /// Find a chunk by id anywhere in the plan.
    pub fn chunk(&self, id: &ChunkId) -> Option<&Chunk> {
        self.phases.iter().flat_map(|p| p.chunks.iter()).find(|c| &c.id == id)
    }

    pub fn chunk_mut(&mut self, id: &ChunkId) -> Option<&mut Chunk> {
        self.phases
            .iter_mut()
            .flat_map(|p| p.chunks.iter_mut())
            .find(|c| &c.id == id)
    }

    /// Whether every dependency of `phase` is fully completed.
    pub fn deps_satisfied(&self, phase: &Phase) -> bool {
        phase
            .depends_on
            .iter()
            .all(|dep| self.phase(*dep).is_some_and(Phase::is_complete))
    }

    /// Whether every chunk in the plan has reached a terminal state.
    pub fn all_finished(&self) -> bool {
        self.phases
            .iter()
            .flat_map(|p| p.chunks.iter())
            .all(Chunk::is_finished)
    }

    /// Validate the plan: unique phase numbers, known dependencies, no
    /// dependency cycles, and disjoint file footprints between phases that
    /// may run in parallel.
    pub fn validate(&self) -> Result<()> {
        let mut numbers = BTreeSet::new();
        for phase in &self.phases {
            if !numbers.insert(phase.number) {
                return Err(Error::DuplicatePhase(phase.number));
            }
        }

        for phase in &self.phases {
            for dep in &phase.depends_on {
                if !numbers.contains(dep) {
                    return Err(Error::UnknownDependency {
                        phase: phase.number,
                        dependency: *dep,
                    });
                }
            }
        }

        let (graph, indices) = self.dependency_graph();
        if let Err(cycle) = toposort(&graph, None) {
            let number = graph[cycle.node_id()];
            return Err(Error::DependencyCycle(number));
        }

        // Phases with no ordering between them may run concurrently; they
        // must not share any file.
        for (i, a) in self.phases.iter().enumerate() {
            for b in &self.phases[i + 1..] {
                let (ia, ib) = (indices[&a.number], indices[&b.number]);
                let ordered = petgraph::algo::has_path_connecting(&graph, ia, ib, None)
                    || petgraph::algo::has_path_connecting(&graph, ib, ia, None);
                if !ordered {
                    validate_parallel_group(&[a, b])?;
                }
            }
        }

        Ok(())
    }

    /// Directed graph with an edge dep -> phase for every dependency.
    fn dependency_graph(&self) -> (DiGraph<u32, ()>, HashMap<u32, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for phase in &self.phases {
            let idx = graph.add_node(phase.number);
            indices.insert(phase.number, idx);
        }
        for phase in &self.phases {
            for dep in &phase.depends_on {
                if let (Some(&from), Some(&to)) = (indices.get(dep), indices.get(&phase.number)) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        (graph, indices)
    }

}

/// Fail-fast check that a set of phases intended to run together touch
/// pairwise-disjoint file sets. Raises a configuration error naming the two
/// phases and the overlapping paths.
pub fn validate_parallel_group(phases: &[&Phase]) -> Result<()> {
    for (i, a) in phases.iter().enumerate() {
        let union_a = a.file_union();
        for b in &phases[i + 1..] {
            let union_b = b.file_union();
            let shared: Vec<String> = union_a.intersection(&union_b).cloned().collect();
            if !shared.is_empty() {
                return Err(Error::PhaseFileOverlap {
                    first: a.number,
                    second: b.number,
                    paths: shared,
                });
            }
        }
    }
    Ok(())
}
