//! Agents and their capabilities.
//!
//! An `Agent` carries a role and a goal plus a `Capability`, the
//! piece that actually produces output for a task. Capabilities are
//! trait objects so built-in, closure-backed and caller-defined
//! executors can sit in the same crew.

use crate::core::output::TaskOutput;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// Create a new unique agent identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type capabilities may return. Anything implementing
/// `std::error::Error` converts into it with `?`.
pub type CapabilityError = Box<dyn std::error::Error + Send + Sync>;

/// What a capability produces for a task.
pub type CapabilityResult = std::result::Result<serde_json::Value, CapabilityError>;

/// Data available to an agent beyond the task itself.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// Outputs of the task's direct dependencies, in dependency order.
    pub upstream: Vec<TaskOutput>,
    /// Inputs supplied to the kickoff.
    pub inputs: HashMap<String, String>,
}

impl TaskContext {
    pub fn new(upstream: Vec<TaskOutput>, inputs: HashMap<String, String>) -> Self {
        Self { upstream, inputs }
    }

    /// Output value of a specific dependency.
    pub fn upstream_value(&self, task_id: &TaskId) -> Option<&serde_json::Value> {
        self.upstream
            .iter()
            .find(|o| &o.task_id == task_id)
            .map(|o| &o.value)
    }

    /// Output of the last listed dependency.
    pub fn last(&self) -> Option<&TaskOutput> {
        self.upstream.last()
    }
}

/// Executes a task on behalf of an agent.
///
/// # Errors
/// Returning `Err` marks the task failed with the error's message.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Produce output for `task`.
    async fn execute(&self, task: &Task, context: &TaskContext) -> CapabilityResult;

    /// Name used in logs and crew definitions.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Capability backed by a synchronous closure.
pub struct FnCapability<F> {
    name: String,
    f: F,
}

impl<F> FnCapability<F>
where
    F: Fn(&Task, &TaskContext) -> CapabilityResult + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

#[async_trait]
impl<F> Capability for FnCapability<F>
where
    F: Fn(&Task, &TaskContext) -> CapabilityResult + Send + Sync,
{
    async fn execute(&self, task: &Task, context: &TaskContext) -> CapabilityResult {
        (self.f)(task, context)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An executor with a role, a goal and a capability.
#[derive(Clone)]
pub struct Agent {
    /// Unique identifier tasks use to reference this agent.
    pub id: AgentId,
    /// Role name, e.g. "Data Analyst".
    pub role: String,
    /// What the agent is trying to achieve.
    pub goal: String,
    /// Optional background for the role.
    pub backstory: Option<String>,
    /// Upper bound on a single task execution.
    pub max_execution_time: Option<Duration>,
    capability: Arc<dyn Capability>,
}

impl Agent {
    /// Create an agent around a capability.
    pub fn new(role: &str, goal: &str, capability: Arc<dyn Capability>) -> Self {
        Self {
            id: AgentId::new(),
            role: role.to_string(),
            goal: goal.to_string(),
            backstory: None,
            max_execution_time: None,
            capability,
        }
    }

    /// Create an agent whose capability is a closure.
    pub fn from_fn<F>(role: &str, goal: &str, f: F) -> Self
    where
        F: Fn(&Task, &TaskContext) -> CapabilityResult + Send + Sync + 'static,
    {
        Self::new(role, goal, Arc::new(FnCapability::new(role, f)))
    }

    pub fn with_backstory(mut self, backstory: &str) -> Self {
        self.backstory = Some(backstory.to_string());
        self
    }

    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = Some(limit);
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn capability_name(&self) -> &str {
        self.capability.name()
    }

    /// Execute a task bound to this agent.
    ///
    /// # Errors
    /// `Error::Execution` if the task belongs to another agent, the
    /// capability fails, or `max_execution_time` elapses.
    pub async fn execute(&self, task: &Task, context: &TaskContext) -> Result<TaskOutput> {
        self.execute_within(task, context, self.max_execution_time)
            .await
    }

    /// Like `execute`, with an explicit time limit overriding the agent's own.
    pub async fn execute_within(
        &self,
        task: &Task,
        context: &TaskContext,
        limit: Option<Duration>,
    ) -> Result<TaskOutput> {
        if task.agent_id != self.id {
            return Err(Error::Execution {
                task: task.name.clone(),
                message: format!(
                    "task is bound to agent {}, not {} ({})",
                    task.agent_id.short(),
                    self.id.short(),
                    self.role
                ),
            });
        }

        let run = self.capability.execute(task, context);
        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(Error::Execution {
                        task: task.name.clone(),
                        message: Error::Timeout(limit).to_string(),
                    })
                }
            },
            None => run.await,
        };

        let value = outcome.map_err(|e| Error::Execution {
            task: task.name.clone(),
            message: e.to_string(),
        })?;

        Ok(TaskOutput::new(task, &self.role, value))
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("goal", &self.goal)
            .field("capability", &self.capability.name())
            .finish()
    }
}
