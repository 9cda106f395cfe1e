//! Known job durations, sliding-window packing
//!
//! Every job must start within `D = δ(1 + 1/ε)` of its arrival. Pending jobs,
//! oldest first, are appended to live containers while the container would
//! reach them inside that window. Whatever is left goes to new containers,
//! launched only once holding the oldest job any longer would push it past
//! the window.

use std::collections::VecDeque;

use super::{SchedulingPolicy, earliest, parse_epsilon, retire_idle_containers, sorted_by_arrival, window};
use crate::action::Action;
use crate::error::Result;
use crate::system::SimulatedSystem;
use crate::types::{DurationEstimate, Job, Time};

/// Bounded-delay packer parameterized by how job durations are estimated
pub struct SlidingWindowPolicy {
    name: &'static str,
    epsilon: f64,
    estimate: DurationEstimate,
}

impl SlidingWindowPolicy {
    pub fn new(name: &'static str, epsilon: f64, estimate: DurationEstimate) -> Self {
        SlidingWindowPolicy {
            name,
            epsilon,
            estimate,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn estimate(&self) -> DurationEstimate {
        self.estimate
    }

    /// Maximum waiting time `D` for a given startup delay
    pub fn max_delay(&self, startup_time: Time) -> Time {
        window(startup_time as f64 * (1.0 + 1.0 / self.epsilon))
    }
}

impl SchedulingPolicy for SlidingWindowPolicy {
    fn determine_actions(&mut self, system: &SimulatedSystem, pending_jobs: &[Job]) -> Vec<Action> {
        let now = system.time();
        let startup = system.startup_time();
        let max_delay = self.max_delay(startup);
        let estimate = self.estimate;

        let mut queue: VecDeque<Job> = sorted_by_arrival(pending_jobs).into();
        let mut actions = Vec::new();

        // Reuse warm containers first
        for container in system.containers() {
            let mut remaining = container.time_until_done_using(estimate);
            let mut packed = Vec::new();
            while let Some(job) = queue.front() {
                if remaining + (now - job.receival_time) > max_delay {
                    break;
                }
                remaining += job.estimated_time(estimate);
                packed.extend(queue.pop_front());
            }
            if !packed.is_empty() {
                actions.push(Action::add_jobs(container.id(), packed));
            }
        }

        let mut launch_at = None;
        while let Some(head) = queue.front() {
            let launch_by = head.receival_time + max_delay - startup;
            let backlog: Time = queue.iter().map(|job| job.estimated_time(estimate)).sum();
            if now + backlog < launch_by {
                launch_at = Some(launch_by - backlog);
                break;
            }

            let mut group = Vec::new();
            let mut packed: Time = 0;
            while let Some(job) = queue.front() {
                let fits = group.is_empty() || startup + packed + (now - job.receival_time) <= max_delay;
                if !fits {
                    break;
                }
                packed += job.estimated_time(estimate);
                group.extend(queue.pop_front());
            }
            actions.push(Action::activate(group));
        }

        let stale = retire_idle_containers(system, &mut actions, estimate);
        if let Some(wake) = earliest(launch_at, stale.map(|delay| now + delay)) {
            actions.push(Action::Wait(wake));
        }
        actions
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Sliding-window packing on true execution times
pub struct Kjd2Policy(SlidingWindowPolicy);

impl Kjd2Policy {
    pub fn new(epsilon: f64) -> Self {
        Kjd2Policy(SlidingWindowPolicy::new("KJD2", epsilon, DurationEstimate::Exact))
    }

    /// Parameters: `[epsilon]`
    pub fn from_params(params: &[String]) -> Result<Self> {
        Ok(Self::new(parse_epsilon(params, "kjd2")?))
    }

    pub fn max_delay(&self, startup_time: Time) -> Time {
        self.0.max_delay(startup_time)
    }
}

impl SchedulingPolicy for Kjd2Policy {
    fn determine_actions(&mut self, system: &SimulatedSystem, pending_jobs: &[Job]) -> Vec<Action> {
        self.0.determine_actions(system, pending_jobs)
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}
