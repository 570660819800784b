//! Task outputs and the per-kickoff result aggregator.

use crate::core::task::{FailureReason, Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Output produced by an agent for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// The task that produced this output.
    pub task_id: TaskId,
    /// Name of the task.
    pub task_name: String,
    /// Description as the agent saw it (after interpolation).
    pub description: String,
    /// Role of the agent that executed the task.
    pub agent_role: String,
    /// The produced value.
    pub value: serde_json::Value,
    /// When the output was produced.
    pub produced_at: DateTime<Utc>,
}

impl TaskOutput {
    pub fn new(task: &Task, agent_role: &str, value: serde_json::Value) -> Self {
        Self {
            task_id: task.id,
            task_name: task.name.clone(),
            description: task.description.clone(),
            agent_role: agent_role.to_string(),
            value,
            produced_at: Utc::now(),
        }
    }

    /// The value as text: strings unquoted, everything else as JSON.
    pub fn raw(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for TaskOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw())
    }
}

/// Final state of one task after a kickoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
}

/// Collects outputs while a kickoff runs.
///
/// Append-only: an output or failure can be recorded once per task.
/// `finish` consumes the aggregator, so nothing is added afterwards.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    outputs: Vec<TaskOutput>,
    index: HashMap<TaskId, usize>,
    failures: HashMap<TaskId, FailureReason>,
    started_at: Option<DateTime<Utc>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    fn already_recorded(&self, task_id: &TaskId) -> bool {
        self.index.contains_key(task_id) || self.failures.contains_key(task_id)
    }

    /// Append a successful output.
    ///
    /// # Errors
    /// `Error::Validation` if the task already has a recorded result.
    pub fn record_output(&mut self, output: TaskOutput) -> Result<()> {
        if self.already_recorded(&output.task_id) {
            return Err(Error::Validation(format!(
                "Result for task {} already recorded",
                output.task_id
            )));
        }
        self.index.insert(output.task_id, self.outputs.len());
        self.outputs.push(output);
        Ok(())
    }

    /// Record that a task failed or was skipped.
    ///
    /// # Errors
    /// `Error::Validation` if the task already has a recorded result.
    pub fn record_failure(&mut self, task_id: TaskId, reason: FailureReason) -> Result<()> {
        if self.already_recorded(&task_id) {
            return Err(Error::Validation(format!(
                "Result for task {} already recorded",
                task_id
            )));
        }
        self.failures.insert(task_id, reason);
        Ok(())
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskOutput> {
        self.index.get(task_id).map(|&i| &self.outputs[i])
    }

    pub fn failure(&self, task_id: &TaskId) -> Option<&FailureReason> {
        self.failures.get(task_id)
    }

    /// Outputs of the given tasks that completed, in the given order.
    pub fn outputs_for(&self, ids: &[TaskId]) -> Vec<TaskOutput> {
        ids.iter().filter_map(|id| self.get(id)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Seal the aggregator into the immutable kickoff result.
    ///
    /// `tasks` is the final state of every task in declaration order.
    pub fn finish(self, tasks: Vec<TaskSummary>, cancelled: bool) -> CrewOutput {
        CrewOutput {
            outputs: self.outputs,
            index: self.index,
            tasks,
            cancelled,
            started_at: self.started_at.unwrap_or_else(Utc::now),
            finished_at: Utc::now(),
        }
    }
}

/// The consolidated result of one kickoff.
#[derive(Debug, Clone, Serialize)]
pub struct CrewOutput {
    outputs: Vec<TaskOutput>,
    #[serde(skip)]
    index: HashMap<TaskId, usize>,
    tasks: Vec<TaskSummary>,
    cancelled: bool,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl CrewOutput {
    /// Outputs of completed tasks in execution order.
    pub fn outputs_in_order(&self) -> &[TaskOutput] {
        &self.outputs
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskOutput> {
        self.index.get(task_id).map(|&i| &self.outputs[i])
    }

    /// Final status of a task in this run.
    pub fn status(&self, task_id: &TaskId) -> Option<&TaskStatus> {
        self.tasks
            .iter()
            .find(|t| &t.id == task_id)
            .map(|t| &t.status)
    }

    /// Final state of every task, in declaration order.
    pub fn tasks(&self) -> &[TaskSummary] {
        &self.tasks
    }

    /// Output of a task, or the error explaining why there is none.
    pub fn require(&self, task_id: &TaskId) -> Result<&TaskOutput> {
        if let Some(output) = self.get(task_id) {
            return Ok(output);
        }
        let summary = self
            .tasks
            .iter()
            .find(|t| &t.id == task_id)
            .ok_or_else(|| Error::Validation(format!("Task {} not part of this crew", task_id)))?;

        Err(match &summary.status {
            TaskStatus::Failed {
                reason: FailureReason::Execution { message },
            } => Error::Execution {
                task: summary.name.clone(),
                message: message.clone(),
            },
            TaskStatus::Failed {
                reason: FailureReason::UpstreamFailure { upstream },
            } => Error::UpstreamFailure {
                task: summary.name.clone(),
                upstream: *upstream,
            },
            TaskStatus::Failed {
                reason: FailureReason::Cancelled,
            } => Error::Cancelled {
                task: summary.name.clone(),
            },
            other => Error::Validation(format!(
                "Task '{}' has no output ({})",
                summary.name, other
            )),
        })
    }

    /// Output of the last task executed, the crew's overall answer.
    pub fn final_output(&self) -> Option<&TaskOutput> {
        self.outputs.last()
    }

    /// Tasks that ended failed, in declaration order.
    pub fn failures(&self) -> impl Iterator<Item = &TaskSummary> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
    }

    /// True when every task finished done.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}

impl std::fmt::Display for CrewOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.final_output() {
            Some(output) => write!(f, "{}", output),
            None => write!(f, "(no output)"),
        }
    }
}
