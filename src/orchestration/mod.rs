//! Orchestration layer: the crew that drives a task graph through its
//! agents, plus the built-in capabilities agents can be bound to.

pub mod capabilities;
mod crew;

pub use capabilities::{
    CapabilityRegistry, DelayCapability, EchoCapability, FailCapability, LengthCapability,
    OutputCheck, RetryCapability, RetryExhausted, StatsCapability, StatsError,
};
pub use crew::{Crew, CrewEvent, FailurePolicy};
