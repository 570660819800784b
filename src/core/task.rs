//! Task data model for the crew's execution graph.
//!
//! Tasks are the atomic units of work bound to agents. Each task
//! tracks its status, its assigned agent, its prerequisites and,
//! once finished, its output.

use crate::core::agent::AgentId;
use crate::core::output::TaskOutput;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use uuid::Uuid;

/// Unique identifier for a task within a crew.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Why a task ended up in the failed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    /// The bound agent returned an error (or timed out).
    Execution {
        /// Error message from the agent.
        message: String,
    },
    /// A prerequisite did not complete, so the task never ran.
    UpstreamFailure {
        /// The first dependency found not done.
        upstream: TaskId,
    },
    /// The run was cancelled before the task started.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Execution { message } => write!(f, "{}", message),
            FailureReason::UpstreamFailure { upstream } => {
                write!(f, "upstream failure ({})", upstream.short())
            }
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Task status in its lifecycle.
///
/// pending -> running -> done | failed. Skipped tasks go
/// straight from pending to failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created and waiting to be scheduled.
    #[default]
    Pending,
    /// Task is currently being executed by its agent.
    Running,
    /// Task completed successfully.
    Done,
    /// Task failed or was skipped.
    Failed {
        /// Why the task failed.
        reason: FailureReason,
    },
}

impl TaskStatus {
    /// Short state name without the failure detail.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed { .. } => "failed",
        }
    }

    /// The failure reason, if the task failed.
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            TaskStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Failed { reason } => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// A single task in the crew.
///
/// Everything except `status`, `output` and the timing fields is
/// fixed once the task is handed to a crew.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable name for the task.
    pub name: String,
    /// What the task should accomplish. May contain `{key}` placeholders.
    pub description: String,
    /// Shape of the output the agent is expected to produce.
    pub expected_output: String,
    /// The agent responsible for executing this task.
    pub agent_id: AgentId,
    /// Tasks that must be done before this one starts, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Free-form parameters handed to the agent.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Current execution status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Output recorded when the task completes.
    pub output: Option<TaskOutput>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task finished (done or failed).
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task bound to `agent_id`, with no dependencies.
    pub fn new(name: &str, description: &str, expected_output: &str, agent_id: AgentId) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            description: description.to_string(),
            expected_output: expected_output.to_string(),
            agent_id,
            dependencies: Vec::new(),
            parameters: BTreeMap::new(),
            status: TaskStatus::Pending,
            output: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Add prerequisites. Duplicates are ignored.
    pub fn depends_on(mut self, ids: &[TaskId]) -> Self {
        for id in ids {
            if !self.dependencies.contains(id) {
                self.dependencies.push(*id);
            }
        }
        self
    }

    /// Attach a parameter for the agent.
    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    /// Look up a parameter by key.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    fn transition_error(&self, to: &str) -> Error {
        Error::InvalidStateTransition {
            from: self.status.label().to_string(),
            to: to.to_string(),
        }
    }

    /// pending -> running.
    pub fn mark_running(&mut self) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.transition_error("running"));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running -> done, storing the output.
    pub fn mark_done(&mut self, output: TaskOutput) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error("done"));
        }
        self.status = TaskStatus::Done;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// running -> failed.
    pub fn mark_failed(&mut self, reason: FailureReason) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error("failed"));
        }
        self.status = TaskStatus::Failed { reason };
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// pending -> failed without ever running.
    ///
    /// Used for upstream failures and cancellation.
    pub fn mark_skipped(&mut self, reason: FailureReason) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.transition_error("failed"));
        }
        self.status = TaskStatus::Failed { reason };
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Return the task to pending for a fresh run.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.output = None;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Check if the task is in a terminal state (Done or Failed).
    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Done | TaskStatus::Failed { .. })
    }

    /// Copy of this task with `{key}` placeholders replaced from `inputs`.
    ///
    /// Unknown placeholders are left untouched.
    pub fn interpolated(&self, inputs: &HashMap<String, String>) -> Task {
        let mut task = self.clone();
        if inputs.is_empty() {
            return task;
        }
        task.description = interpolate(&self.description, inputs);
        task.expected_output = interpolate(&self.expected_output, inputs);
        for value in task.parameters.values_mut() {
            *value = interpolate(value, inputs);
        }
        task
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_\-]*)\}").expect("placeholder pattern is valid")
    })
}

/// Replace `{key}` placeholders in `template` with values from `inputs`.
pub fn interpolate(template: &str, inputs: &HashMap<String, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures| {
            inputs
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
