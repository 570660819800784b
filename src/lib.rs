//! Multi-agent task orchestration.
//!
//! Build `Agent`s, bind `Task`s to them, put both in a `Crew` and call
//! `kickoff()`. The crew validates the dependency graph, runs tasks in
//! a stable topological order and returns a `CrewOutput`.

pub mod config;
pub mod core;
pub mod definition;
pub mod error;
pub mod log;
pub mod orchestration;

pub use crate::core::{
    Agent, AgentId, Capability, CapabilityResult, CrewOutput, FailureReason, Task, TaskContext,
    TaskId, TaskOutput, TaskStatus,
};
pub use config::Config;
pub use definition::CrewDefinition;
pub use error::{Error, Result};
pub use orchestration::{CapabilityRegistry, Crew, CrewEvent, FailurePolicy};
