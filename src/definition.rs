//! Crew definitions loaded from TOML or JSON files.
//!
//! A definition names agents by role and tasks by name; `build`
//! resolves those names into a `Crew`, binding each agent to a
//! capability from a `CapabilityRegistry`.
//!
//! ```toml
//! name = "data-analysis"
//!
//! [[agents]]
//! role = "Data Analyst"
//! goal = "Summarize numeric data"
//! capability = "stats"
//!
//! [[tasks]]
//! name = "analyze"
//! description = "Analyze {dataset}"
//! agent = "Data Analyst"
//! parameters = { data = "1,2,3" }
//! ```

use crate::config::Config;
use crate::core::agent::{Agent, Capability};
use crate::core::task::{Task, TaskId};
use crate::orchestration::{CapabilityRegistry, Crew, FailurePolicy, OutputCheck, RetryCapability};
use crate::{clog_debug, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn default_name() -> String {
    "crew".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefinition {
    pub role: String,
    pub goal: String,
    pub backstory: Option<String>,
    /// Name of a capability in the registry.
    pub capability: String,
    pub max_execution_time_secs: Option<u64>,
    /// Extra attempts after a failed or rejected call.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Output shape required for a call to count as a success.
    #[serde(default)]
    pub expect_output: Option<OutputCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub expected_output: String,
    /// Role of the agent that executes the task.
    pub agent: String,
    /// Names of prerequisite tasks.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrewDefinition {
    #[serde(default = "default_name")]
    pub name: String,
    /// Overrides the configured policy when set.
    pub failure_policy: Option<FailurePolicy>,
    /// Default kickoff inputs; command-line inputs take precedence.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

impl CrewDefinition {
    /// Load a definition; `.json` files are JSON, anything else TOML.
    pub fn load(path: &Path) -> Result<Self> {
        clog_debug!("CrewDefinition::load path={}", path.display());
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Kickoff inputs as a map.
    pub fn inputs(&self) -> HashMap<String, String> {
        self.inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Policy for a run: an explicit override first, then this
    /// definition, then the config.
    pub fn resolve_policy(&self, overridden: Option<FailurePolicy>, config: &Config) -> FailurePolicy {
        overridden
            .or(self.failure_policy)
            .unwrap_or(config.failure_policy)
    }

    /// Resolve roles, task names and capabilities into a crew.
    ///
    /// Cycles are not checked here; `Crew::validate` or `kickoff`
    /// reports them.
    ///
    /// # Errors
    /// `Error::Validation` naming the offending agent or task.
    pub fn build(&self, registry: &CapabilityRegistry, config: &Config) -> Result<Crew> {
        self.build_with_policy(registry, config, None)
    }

    /// Like `build`, with a policy that beats both the definition and
    /// the config (the command line's `--policy`).
    pub fn build_with_policy(
        &self,
        registry: &CapabilityRegistry,
        config: &Config,
        policy: Option<FailurePolicy>,
    ) -> Result<Crew> {
        let agents = self.build_agents(registry)?;
        let roles: HashMap<&str, &Agent> = agents.iter().map(|a| (a.role.as_str(), a)).collect();

        let mut ids: HashMap<&str, TaskId> = HashMap::new();
        for def in &self.tasks {
            if ids.insert(def.name.as_str(), TaskId::new()).is_some() {
                return Err(Error::Validation(format!(
                    "Duplicate task name '{}'",
                    def.name
                )));
            }
        }

        let mut tasks = Vec::with_capacity(self.tasks.len());
        for def in &self.tasks {
            let agent = roles.get(def.agent.as_str()).ok_or_else(|| {
                Error::Validation(format!(
                    "Task '{}' references unknown agent role '{}'",
                    def.name, def.agent
                ))
            })?;

            let mut dependencies = Vec::with_capacity(def.depends_on.len());
            for dep in &def.depends_on {
                let id = ids.get(dep.as_str()).ok_or_else(|| {
                    Error::Validation(format!(
                        "Task '{}' depends on unknown task '{}'",
                        def.name, dep
                    ))
                })?;
                dependencies.push(*id);
            }

            let mut task = Task::new(&def.name, &def.description, &def.expected_output, agent.id())
                .depends_on(&dependencies);
            task.id = ids[def.name.as_str()];
            task.parameters = def.parameters.clone();
            tasks.push(task);
        }

        let policy = self.resolve_policy(policy, config);
        clog_debug!(
            "CrewDefinition '{}' built: {} agents, {} tasks, policy={}",
            self.name,
            agents.len(),
            tasks.len(),
            policy
        );
        Ok(Crew::from_config(agents, tasks, config)
            .with_policy(policy)
            .with_name(&self.name))
    }

    fn build_agents(&self, registry: &CapabilityRegistry) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = Vec::with_capacity(self.agents.len());
        for def in &self.agents {
            if agents.iter().any(|a| a.role == def.role) {
                return Err(Error::Validation(format!(
                    "Duplicate agent role '{}'",
                    def.role
                )));
            }
            let capability = registry.get(&def.capability).ok_or_else(|| {
                Error::Validation(format!(
                    "Agent '{}' uses unknown capability '{}' (available: {})",
                    def.role,
                    def.capability,
                    registry.names().join(", ")
                ))
            })?;

            let capability: Arc<dyn Capability> = match (def.max_retries, def.expect_output) {
                (None, None) => capability,
                (retries, check) => Arc::new(
                    RetryCapability::new(capability, retries.unwrap_or(0).saturating_add(1))
                        .with_check(check.unwrap_or_default()),
                ),
            };

            let mut agent = Agent::new(&def.role, &def.goal, capability);
            if let Some(backstory) = &def.backstory {
                agent = agent.with_backstory(backstory);
            }
            if let Some(secs) = def.max_execution_time_secs {
                if secs == 0 {
                    return Err(Error::Validation(format!(
                        "Agent '{}' max_execution_time_secs must be greater than zero",
                        def.role
                    )));
                }
                agent = agent.with_max_execution_time(Duration::from_secs(secs));
            }
            agents.push(agent);
        }
        Ok(agents)
    }
}
