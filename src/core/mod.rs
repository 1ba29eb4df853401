//! Core data model: plans, phases, and chunks.
//!
//! The plan structure is authored by an external planning component; this
//! crate reads it to schedule work and writes chunk status back into it.

pub mod chunk;
pub mod plan;

pub use chunk::{Chunk, ChunkId, ChunkStatus};
pub use plan::{Phase, Plan};
