//! Known job durations, threshold batching
//!
//! With threshold `e* = 2δ/ε`, a job at least `e*` long amortizes startup on
//! its own and gets a fresh container immediately. Shorter jobs are batched
//! in arrival order; a batch launches as one container once its volume
//! reaches `e*`, or once its oldest job has waited `e* − δ`.
//!
//! Containers are never reused: each one is terminated as soon as it drains.

use super::{SchedulingPolicy, earliest, parse_epsilon, retire_idle_containers, sorted_by_arrival, window};
use crate::action::Action;
use crate::error::Result;
use crate::system::SimulatedSystem;
use crate::types::{DurationEstimate, Job, Time};

pub struct Kjd1Policy {
    epsilon: f64,
}

impl Kjd1Policy {
    pub fn new(epsilon: f64) -> Self {
        Kjd1Policy { epsilon }
    }

    /// Parameters: `[epsilon]`
    pub fn from_params(params: &[String]) -> Result<Self> {
        Ok(Self::new(parse_epsilon(params, "kjd1")?))
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Batch threshold `e*` for a given startup delay
    pub fn threshold(&self, startup_time: Time) -> Time {
        window(2.0 * startup_time as f64 / self.epsilon)
    }

    /// Latest time a batch whose oldest job arrived at `receival` may launch
    pub fn flush_deadline(&self, receival: Time, startup_time: Time) -> Time {
        receival + self.threshold(startup_time) - startup_time
    }
}

impl SchedulingPolicy for Kjd1Policy {
    fn determine_actions(&mut self, system: &SimulatedSystem, pending_jobs: &[Job]) -> Vec<Action> {
        let now = system.time();
        let startup = system.startup_time();
        let threshold = self.threshold(startup);

        let mut actions = Vec::new();
        let mut batch: Vec<Job> = Vec::new();
        let mut batch_volume: Time = 0;

        for job in sorted_by_arrival(pending_jobs) {
            if job.execution_time >= threshold {
                actions.push(Action::activate(vec![job]));
                continue;
            }

            batch_volume += job.execution_time;
            batch.push(job);
            if batch_volume >= threshold {
                actions.push(Action::activate(std::mem::take(&mut batch)));
                batch_volume = 0;
            }
        }

        let mut flush_at = None;
        if let Some(oldest) = batch.first() {
            let deadline = self.flush_deadline(oldest.receival_time, startup);
            if now >= deadline {
                actions.push(Action::activate(batch));
            } else {
                flush_at = Some(deadline);
            }
        }

        let stale = retire_idle_containers(system, &mut actions, DurationEstimate::Exact);
        if let Some(wake) = earliest(flush_at, stale.map(|delay| now + delay)) {
            actions.push(Action::Wait(wake));
        }
        actions
    }

    fn name(&self) -> &str {
        "KJD1"
    }
}
