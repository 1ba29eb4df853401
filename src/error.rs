use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Timed out acquiring lock '{resource}' after {waited:?}")]
    LockTimeout { resource: String, waited: Duration },

    #[error("Phases {first} and {second} share files and cannot run in parallel: {}", .paths.join(", "))]
    PhaseFileOverlap {
        first: u32,
        second: u32,
        paths: Vec<String>,
    },

    #[error("Phase dependency cycle involving phase {0}")]
    DependencyCycle(u32),

    #[error("Phase {phase} depends on unknown phase {dependency}")]
    UnknownDependency { phase: u32, dependency: u32 },

    #[error("Duplicate phase number: {0}")]
    DuplicatePhase(u32),

    #[error("Spec worktree not found: {0}")]
    SpecNotFound(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Agent command not available: {0}")]
    AgentNotAvailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
