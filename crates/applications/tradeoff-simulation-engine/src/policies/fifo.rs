//! Fixed worker pool with greedy list scheduling

use super::assign::LeastLoadedPlanner;
use super::{SchedulingPolicy, sorted_by_arrival};
use crate::action::Action;
use crate::error::{Result, SimError};
use crate::system::SimulatedSystem;
use crate::types::{ContainerMetadata, DurationEstimate, Job};

/// FIFO over `workers` containers.
///
/// Pending jobs, in arrival order, go to whichever of the workers would
/// finish its queue first. Workers are activated lazily the first time a job
/// lands on them and are never terminated. No wake-up is ever requested.
pub struct FifoPolicy {
    workers: usize,
}

impl FifoPolicy {
    pub fn new(workers: usize) -> Self {
        FifoPolicy {
            workers: workers.max(1),
        }
    }

    /// Parameters: `[workers]`, defaulting to a single worker
    pub fn from_params(params: &[String]) -> Result<Self> {
        let workers = match params.first() {
            None => 1,
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                SimError::invalid_parameter(format!("fifo: worker count '{raw}' is not an integer"))
            })?,
        };

        if workers == 0 {
            return Err(SimError::invalid_parameter("fifo: worker count must be at least 1"));
        }
        Ok(Self::new(workers))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl SchedulingPolicy for FifoPolicy {
    fn determine_actions(&mut self, system: &SimulatedSystem, pending_jobs: &[Job]) -> Vec<Action> {
        if pending_jobs.is_empty() {
            return Vec::new();
        }

        let mut planner = LeastLoadedPlanner::new(DurationEstimate::Exact);
        for container in system.containers() {
            planner.add_existing(container);
        }
        for _ in system.container_count()..self.workers {
            planner.add_new(system.startup_time());
        }

        for job in sorted_by_arrival(pending_jobs) {
            planner.assign(job);
        }

        planner.into_actions(ContainerMetadata::default(), false)
    }

    fn name(&self) -> &str {
        "FIFO"
    }
}
