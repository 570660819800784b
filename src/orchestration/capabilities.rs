//! Built-in capabilities and the name-based registry crew definitions use.
//!
//! These are deterministic executors. Anything that talks to an
//! external system implements `Capability` itself and registers
//! under its own name.

use crate::core::agent::{Capability, CapabilityResult, TaskContext};
use crate::core::task::Task;
use crate::{clog_debug, clog_warn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Returns the task description (after interpolation).
pub struct EchoCapability;

#[async_trait]
impl Capability for EchoCapability {
    async fn execute(&self, task: &Task, _context: &TaskContext) -> CapabilityResult {
        Ok(json!(task.description))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Counts the characters of the `input` parameter, or of the
/// description when there is none.
pub struct LengthCapability;

#[async_trait]
impl Capability for LengthCapability {
    async fn execute(&self, task: &Task, _context: &TaskContext) -> CapabilityResult {
        let text = task.parameter("input").unwrap_or(&task.description);
        Ok(json!(text.chars().count()))
    }

    fn name(&self) -> &str {
        "length"
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum StatsError {
    #[error("no numbers to analyze (set the 'data' parameter or depend on a task that outputs numbers)")]
    NoData,

    #[error("invalid number in data: '{0}'")]
    InvalidNumber(String),
}

/// Summary statistics over a list of numbers.
///
/// Reads the `data` parameter (comma or whitespace separated). Without
/// one, it uses the last upstream output when that is a number array.
pub struct StatsCapability;

impl StatsCapability {
    fn parse(data: &str) -> Result<Vec<f64>, StatsError> {
        data.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| StatsError::InvalidNumber(s.to_string()))
            })
            .collect()
    }

    fn from_context(context: &TaskContext) -> Vec<f64> {
        context
            .last()
            .and_then(|o| o.value.as_array())
            .map(|values| values.iter().filter_map(|v| v.as_f64()).collect())
            .unwrap_or_default()
    }

    /// Count, sum, mean, min and max of `values`.
    pub fn summarize(values: &[f64]) -> Result<serde_json::Value, StatsError> {
        if values.is_empty() {
            return Err(StatsError::NoData);
        }
        let sum: f64 = values.iter().sum();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(json!({
            "count": values.len(),
            "sum": sum,
            "mean": sum / values.len() as f64,
            "min": min,
            "max": max,
        }))
    }
}

#[async_trait]
impl Capability for StatsCapability {
    async fn execute(&self, task: &Task, context: &TaskContext) -> CapabilityResult {
        let values = match task.parameter("data") {
            Some(data) => Self::parse(data)?,
            None => Self::from_context(context),
        };
        Ok(Self::summarize(&values)?)
    }

    fn name(&self) -> &str {
        "stats"
    }
}

/// Always fails with a fixed message.
pub struct FailCapability {
    message: String,
}

impl FailCapability {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Capability for FailCapability {
    async fn execute(&self, _task: &Task, _context: &TaskContext) -> CapabilityResult {
        Err(self.message.clone().into())
    }

    fn name(&self) -> &str {
        "fail"
    }
}

/// Sleeps, then echoes the description. Stands in for a slow
/// external call.
pub struct DelayCapability {
    delay: Duration,
}

impl DelayCapability {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Capability for DelayCapability {
    async fn execute(&self, task: &Task, _context: &TaskContext) -> CapabilityResult {
        tokio::time::sleep(self.delay).await;
        Ok(json!(task.description))
    }

    fn name(&self) -> &str {
        "delay"
    }
}

/// Shape a capability's output must have to count as a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputCheck {
    /// Anything, including null.
    #[default]
    Any,
    NonNull,
    Object,
    Array,
    Number,
    String,
}

impl OutputCheck {
    /// Accept `value`, or say why it was rejected.
    ///
    /// For `Object` and `Array`, a string holding JSON of that shape is
    /// parsed and accepted.
    pub fn accept(self, value: serde_json::Value) -> Result<serde_json::Value, String> {
        let value = match (self, value) {
            (OutputCheck::Object | OutputCheck::Array, serde_json::Value::String(text)) => {
                serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
            }
            (_, value) => value,
        };
        let ok = match self {
            OutputCheck::Any => true,
            OutputCheck::NonNull => !value.is_null(),
            OutputCheck::Object => value.is_object(),
            OutputCheck::Array => value.is_array(),
            OutputCheck::Number => value.is_number(),
            OutputCheck::String => value.is_string(),
        };
        if ok {
            Ok(value)
        } else {
            Err(format!("output is not {}: {}", self, value))
        }
    }
}

impl std::fmt::Display for OutputCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputCheck::Any => "any",
            OutputCheck::NonNull => "non-null",
            OutputCheck::Object => "an object",
            OutputCheck::Array => "an array",
            OutputCheck::Number => "a number",
            OutputCheck::String => "a string",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("failed after {attempts} attempts: {last}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last: String,
}

/// Re-runs a capability until it succeeds and its output passes the
/// check, up to `max_attempts` calls. The crew sees a single execution.
pub struct RetryCapability {
    inner: Arc<dyn Capability>,
    max_attempts: u32,
    check: OutputCheck,
}

impl RetryCapability {
    /// `max_attempts` counts the first call; zero is treated as one.
    pub fn new(inner: Arc<dyn Capability>, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            check: OutputCheck::Any,
        }
    }

    pub fn with_check(mut self, check: OutputCheck) -> Self {
        self.check = check;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[async_trait]
impl Capability for RetryCapability {
    async fn execute(&self, task: &Task, context: &TaskContext) -> CapabilityResult {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            let outcome = match self.inner.execute(task, context).await {
                Ok(value) => self.check.accept(value),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        clog_debug!("Task '{}' succeeded on attempt {}", task.name, attempt);
                    }
                    return Ok(value);
                }
                Err(reason) => {
                    clog_warn!(
                        "Task '{}' attempt {}/{} failed: {}",
                        task.name,
                        attempt,
                        self.max_attempts,
                        reason
                    );
                    last = reason;
                }
            }
        }
        Err(RetryExhausted {
            attempts: self.max_attempts,
            last,
        }
        .into())
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Capabilities addressable by name.
#[derive(Clone)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry with `echo`, `length`, `stats`, `fail` and `delay`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("echo", Arc::new(EchoCapability));
        registry.register("length", Arc::new(LengthCapability));
        registry.register("stats", Arc::new(StatsCapability));
        registry.register("fail", Arc::new(FailCapability::new("task failed")));
        registry.register("delay", Arc::new(DelayCapability::new(Duration::from_secs(1))));
        registry
    }

    /// Add or replace a capability.
    pub fn register(&mut self, name: &str, capability: Arc<dyn Capability>) {
        self.entries.insert(name.to_string(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}
