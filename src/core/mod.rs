//! Core domain models for crew orchestration.
//!
//! This module contains the fundamental data structures used throughout
//! the orchestration system: agents, tasks, the execution DAG and the
//! result aggregator.

pub mod agent;
pub mod dag;
pub mod output;
pub mod task;

pub use agent::{Agent, AgentId, Capability, CapabilityError, CapabilityResult, FnCapability, TaskContext};
pub use dag::TaskDAG;
pub use output::{CrewOutput, ResultAggregator, TaskOutput, TaskSummary};
pub use task::{FailureReason, Task, TaskId, TaskStatus};
