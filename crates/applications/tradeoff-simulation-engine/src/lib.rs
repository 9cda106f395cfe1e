//! Tradeoff Simulation Engine
//!
//! Discrete-event testbed for online container autoscaling. A controller
//! replays a job trace against a simulated pool of containers, asks a
//! scheduling policy what to do at each event, and reports the resulting
//! cost (billed container time) and per-job queue times.

pub mod action;
pub mod config;
pub mod container;
pub mod controller;
pub mod error;
pub mod generator;
pub mod policies;
pub mod results;
pub mod system;
pub mod trace;
pub mod types;

pub use action::Action;
pub use config::{PolicySpec, RunConfig};
pub use container::Container;
pub use controller::{Controller, StepOutcome};
pub use error::{Result, SimError};
pub use policies::{PolicyRegistry, SchedulingPolicy};
pub use results::SimulationReport;
pub use system::SimulatedSystem;
pub use types::{ContainerId, ContainerMetadata, DurationEstimate, Job, JobId, Time};
