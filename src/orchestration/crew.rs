//! The crew: agents plus a task graph, executed by `kickoff`.
//!
//! `kickoff` validates the graph, resets every task to pending, then
//! walks the tasks in a stable topological order, one at a time,
//! handing each to its bound agent. The failure policy decides what
//! happens after a task fails.

use crate::config::Config;
use crate::core::agent::{Agent, AgentId, TaskContext};
use crate::core::dag::TaskDAG;
use crate::core::output::{CrewOutput, ResultAggregator};
use crate::core::task::{FailureReason, Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::{clog, clog_debug, clog_error, clog_trace, clog_warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// What the crew does after a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run and return the task's error. Later tasks stay pending.
    #[default]
    FailFast,
    /// Record the failure, skip its dependents and keep going.
    BestEffort,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail_fast"),
            FailurePolicy::BestEffort => write!(f, "best_effort"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(FailurePolicy::FailFast),
            "best_effort" => Ok(FailurePolicy::BestEffort),
            other => Err(format!(
                "unknown failure policy '{}' (expected fail-fast or best-effort)",
                other
            )),
        }
    }
}

/// Events emitted while a kickoff runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrewEvent {
    /// Validation passed and execution is about to start.
    KickoffStarted {
        /// Number of tasks in the run.
        tasks: usize,
    },
    /// A task was handed to its agent.
    TaskStarted { task_id: TaskId, agent_id: AgentId },
    /// A task finished done.
    TaskCompleted { task_id: TaskId },
    /// A task's agent returned an error.
    TaskFailed { task_id: TaskId, error: String },
    /// A task was never started.
    TaskSkipped {
        task_id: TaskId,
        reason: FailureReason,
    },
    /// The run is over, whatever the outcome.
    KickoffFinished {
        completed: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// Clears the running flag when a kickoff ends, even if its future is dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ConcurrentRun)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Agents and tasks for one orchestrated run.
///
/// `kickoff` takes `&self`, so a crew can be shared through `Arc`;
/// overlapping kickoffs on the same crew fail with `Error::ConcurrentRun`.
///
/// # Example
///
/// ```ignore
/// use crew::{Agent, Crew, Task};
///
/// let analyst = Agent::from_fn("Data Analyst", "Summarize data", |task, _| {
///     Ok(serde_json::json!(task.description.len()))
/// });
/// let task = Task::new("analyze", "count this", "a number", analyst.id());
/// let task_id = task.id;
///
/// let crew = Crew::new(vec![analyst], vec![task]);
/// let output = crew.kickoff().await?;
/// assert!(output.get(&task_id).is_some());
/// ```
pub struct Crew {
    name: String,
    agents: Vec<Agent>,
    agent_index: HashMap<AgentId, usize>,
    dag: RwLock<TaskDAG>,
    policy: FailurePolicy,
    task_timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    event_tx: Option<mpsc::Sender<CrewEvent>>,
    running: AtomicBool,
}

impl Crew {
    /// Create a crew. Tasks keep their declaration order; nothing is
    /// validated until `kickoff`.
    pub fn new(agents: Vec<Agent>, tasks: Vec<Task>) -> Self {
        let mut agent_index = HashMap::new();
        for (i, agent) in agents.iter().enumerate() {
            agent_index.entry(agent.id).or_insert(i);
        }

        let mut dag = TaskDAG::new();
        for task in tasks {
            dag.add_task(task);
        }

        Self {
            name: "crew".to_string(),
            agents,
            agent_index,
            dag: RwLock::new(dag),
            policy: FailurePolicy::default(),
            task_timeout: None,
            cancel: None,
            event_tx: None,
            running: AtomicBool::new(false),
        }
    }

    /// Create a crew with policy and timeout taken from `config`.
    pub fn from_config(agents: Vec<Agent>, tasks: Vec<Task>, config: &Config) -> Self {
        let mut crew = Self::new(agents, tasks).with_policy(config.failure_policy);
        crew.task_timeout = config.task_timeout();
        crew
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default time limit for agents without their own `max_execution_time`.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Token checked between tasks; once cancelled, remaining tasks are skipped.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<CrewEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, id: &AgentId) -> Option<&Agent> {
        self.agent_index.get(id).map(|&i| &self.agents[i])
    }

    /// Whether a kickoff is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshot of all tasks in declaration order.
    pub async fn tasks(&self) -> Vec<Task> {
        let dag = self.dag.read().await;
        dag.all_tasks().into_iter().cloned().collect()
    }

    pub async fn task_count(&self) -> usize {
        self.dag.read().await.task_count()
    }

    pub async fn task_status(&self, id: &TaskId) -> Option<TaskStatus> {
        let dag = self.dag.read().await;
        dag.get_task(id).map(|t| t.status.clone())
    }

    /// Check agents and dependencies and return the execution order.
    ///
    /// Leaves task state untouched.
    ///
    /// # Errors
    /// `UnknownAgent`, `UnknownTask` or `CycleDetected`.
    pub async fn validate(&self) -> Result<Vec<TaskId>> {
        let mut dag = self.dag.write().await;

        for task in dag.all_tasks() {
            if !self.agent_index.contains_key(&task.agent_id) {
                return Err(Error::UnknownAgent {
                    task: task.name.clone(),
                    agent: task.agent_id,
                });
            }
        }

        dag.rewire()?;
        dag.execution_order()
    }

    /// Run every task and return the aggregated result.
    ///
    /// # Errors
    /// - `ConcurrentRun` if another kickoff on this crew is in flight
    /// - `UnknownAgent`, `UnknownTask`, `CycleDetected` before any task runs
    /// - `Execution` for the first failing task under fail-fast
    pub async fn kickoff(&self) -> Result<CrewOutput> {
        self.kickoff_with_inputs(HashMap::new()).await
    }

    /// Like `kickoff`, replacing `{key}` placeholders in task
    /// descriptions, expected outputs and parameters for this run.
    pub async fn kickoff_with_inputs(&self, inputs: HashMap<String, String>) -> Result<CrewOutput> {
        let _guard = RunGuard::acquire(&self.running)?;

        let order = match self.validate().await {
            Ok(order) => order,
            Err(e) => {
                clog_error!("Crew '{}' kickoff rejected: {}", self.name, e);
                return Err(e);
            }
        };
        self.dag.write().await.reset_all();

        clog!(
            "Crew '{}' kickoff: {} tasks, {} agents, policy={}",
            self.name,
            order.len(),
            self.agents.len(),
            self.policy
        );
        self.emit(CrewEvent::KickoffStarted { tasks: order.len() });

        let mut results = ResultAggregator::new();
        let mut cancelled = false;

        for (position, task_id) in order.iter().enumerate() {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                clog_warn!(
                    "Crew '{}' cancelled with {} tasks remaining",
                    self.name,
                    order.len() - position
                );
                cancelled = true;
                for remaining in &order[position..] {
                    self.skip(remaining, FailureReason::Cancelled, &mut results)
                        .await?;
                }
                break;
            }

            let task = {
                let dag = self.dag.read().await;
                dag.get_task(task_id)
                    .cloned()
                    .ok_or_else(|| Error::Validation(format!("Task {} not found in DAG", task_id)))?
            };

            if let Some(upstream) = self.unfinished_dependency(&task).await {
                self.skip(
                    task_id,
                    FailureReason::UpstreamFailure { upstream },
                    &mut results,
                )
                .await?;
                continue;
            }

            if let Err(e) = self.run_task(&task, &inputs, &mut results).await {
                self.finish_events(&results, false).await;
                return Err(e);
            }
        }

        self.finish_events(&results, cancelled).await;
        let summaries = self.dag.read().await.summaries();
        let output = results.finish(summaries, cancelled);
        clog!(
            "Crew '{}' finished: {} outputs, {} failed, cancelled={}",
            self.name,
            output.outputs_in_order().len(),
            output.failures().count(),
            cancelled
        );
        Ok(output)
    }

    /// Execute one task. Returns `Err` only when the run must abort.
    async fn run_task(
        &self,
        task: &Task,
        inputs: &HashMap<String, String>,
        results: &mut ResultAggregator,
    ) -> Result<()> {
        let agent = self
            .agent(&task.agent_id)
            .ok_or_else(|| Error::UnknownAgent {
                task: task.name.clone(),
                agent: task.agent_id,
            })?;

        self.dag.write().await.task_mut(&task.id)?.mark_running()?;
        clog_debug!(
            "Task '{}' ({}) running on '{}'",
            task.name,
            task.id.short(),
            agent.role
        );
        self.emit(CrewEvent::TaskStarted {
            task_id: task.id,
            agent_id: agent.id,
        });

        let rendered = task.interpolated(inputs);
        let context = TaskContext::new(results.outputs_for(&task.dependencies), inputs.clone());
        clog_trace!(
            "Task '{}' context: {} upstream outputs",
            task.name,
            context.upstream.len()
        );
        let limit = agent.max_execution_time.or(self.task_timeout);

        match agent.execute_within(&rendered, &context, limit).await {
            Ok(output) => {
                clog_trace!("Task '{}' output: {}", task.name, output.raw());
                self.dag
                    .write()
                    .await
                    .task_mut(&task.id)?
                    .mark_done(output.clone())?;
                results.record_output(output)?;
                clog_debug!("Task '{}' done", task.name);
                self.emit(CrewEvent::TaskCompleted { task_id: task.id });
                Ok(())
            }
            Err(e) => {
                let message = match e {
                    Error::Execution { message, .. } => message,
                    other => other.to_string(),
                };
                let reason = FailureReason::Execution {
                    message: message.clone(),
                };
                self.dag
                    .write()
                    .await
                    .task_mut(&task.id)?
                    .mark_failed(reason.clone())?;
                results.record_failure(task.id, reason)?;
                self.emit(CrewEvent::TaskFailed {
                    task_id: task.id,
                    error: message.clone(),
                });

                match self.policy {
                    FailurePolicy::FailFast => {
                        clog_error!("Task '{}' failed, aborting run: {}", task.name, message);
                        Err(Error::Execution {
                            task: task.name.clone(),
                            message,
                        })
                    }
                    FailurePolicy::BestEffort => {
                        clog_warn!("Task '{}' failed, continuing: {}", task.name, message);
                        Ok(())
                    }
                }
            }
        }
    }

    /// First dependency (in declaration order) that did not finish done.
    async fn unfinished_dependency(&self, task: &Task) -> Option<TaskId> {
        let dag = self.dag.read().await;
        task.dependencies.iter().copied().find(|dep| {
            dag.get_task(dep)
                .map(|t| t.status != TaskStatus::Done)
                .unwrap_or(true)
        })
    }

    async fn skip(
        &self,
        task_id: &TaskId,
        reason: FailureReason,
        results: &mut ResultAggregator,
    ) -> Result<()> {
        {
            let mut dag = self.dag.write().await;
            let task = dag.task_mut(task_id)?;
            clog_warn!("Task '{}' skipped: {}", task.name, reason);
            task.mark_skipped(reason.clone())?;
        }
        results.record_failure(*task_id, reason.clone())?;
        self.emit(CrewEvent::TaskSkipped {
            task_id: *task_id,
            reason,
        });
        Ok(())
    }

    async fn finish_events(&self, results: &ResultAggregator, cancelled: bool) {
        if self.event_tx.is_none() {
            return;
        }
        let failed = self
            .dag
            .read()
            .await
            .all_tasks()
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
            .count();
        self.emit(CrewEvent::KickoffFinished {
            completed: results.len(),
            failed,
            cancelled,
        });
    }

    /// Events are dropped rather than blocking the run when the
    /// receiver is full or gone.
    fn emit(&self, event: CrewEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(e) = tx.try_send(event) {
                clog_trace!("Crew event dropped: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Crew {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crew")
            .field("name", &self.name)
            .field("agents", &self.agents.len())
            .field("policy", &self.policy)
            .field("running", &self.is_running())
            .finish()
    }
}
