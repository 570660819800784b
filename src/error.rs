use thiserror::Error;

use crate::core::{AgentId, TaskId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task '{task}' references unknown agent {agent}")]
    UnknownAgent { task: String, agent: AgentId },

    #[error("Task '{task}' depends on unknown task {dependency}")]
    UnknownTask { task: String, dependency: TaskId },

    #[error("Cycle detected at task: {task}")]
    CycleDetected { task: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Task '{task}' failed: {message}")]
    Execution { task: String, message: String },

    #[error("Task '{task}' skipped: upstream task {upstream} did not complete")]
    UpstreamFailure { task: String, upstream: TaskId },

    #[error("Task '{task}' cancelled before it started")]
    Cancelled { task: String },

    #[error("Crew is already running a kickoff")]
    ConcurrentRun,
}

pub type Result<T> = std::result::Result<T, Error>;
