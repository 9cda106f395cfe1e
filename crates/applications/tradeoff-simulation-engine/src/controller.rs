//! Event loop driving a policy against the simulated system
//!
//! Each step advances the clock to the next arrival or to the wake-up the
//! policy last asked for, whichever comes first, admits the jobs that have
//! arrived by then, and lets the policy act on the pending set. The run ends
//! when no arrivals remain, no wake-up is pending, and every job has been
//! handed to a container; the system is then run forward until idle.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::action::{Action, requested_wait};
use crate::config::RunConfig;
use crate::error::{Result, SimError};
use crate::policies::{PolicyRegistry, SchedulingPolicy};
use crate::results::{JobOutcome, SimulationReport};
use crate::system::SimulatedSystem;
use crate::trace::read_trace;
use crate::types::{Job, JobId, Time};

/// Consecutive steps without progress before the run is declared stuck
const STALL_LIMIT: u32 = 2;

/// What a single step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub time: Time,
    pub cost: Time,
    pub pending: usize,
    pub actions: usize,
    pub arrivals: usize,
}

/// Clock and arrival bookkeeping between advancing time and applying actions
struct StepStart {
    now: Time,
    time: Time,
    arrivals: usize,
    pending_before: usize,
}

pub struct Controller {
    system: SimulatedSystem,
    policy: Option<Box<dyn SchedulingPolicy>>,

    // Jobs in arrival order; completion times are filled in after a run
    jobs: Vec<Job>,
    next_arrival: usize,
    pending: Vec<Job>,
    wait_until: Option<Time>,

    steps: u64,
    max_steps: Option<u64>,
    stalled_steps: u32,
}

impl Controller {
    /// Create a controller over `jobs` with no policy attached
    pub fn new(startup_time: Time, mut jobs: Vec<Job>) -> Self {
        jobs.sort_by(Job::arrival_order);
        Controller {
            system: SimulatedSystem::new(startup_time),
            policy: None,
            jobs,
            next_arrival: 0,
            pending: Vec::new(),
            wait_until: None,
            steps: 0,
            max_steps: None,
            stalled_steps: 0,
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn SchedulingPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Abort with `StepLimitExceeded` after `max_steps` steps
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Load the trace and resolve the policy named by `config`
    pub fn from_config(config: &RunConfig, registry: &PolicyRegistry) -> Result<Self> {
        config.validate()?;
        let jobs = read_trace(&config.jobs_file)?;
        let policy = registry.build(&config.policy.name, &config.policy.params)?;

        let mut controller = Self::new(config.startup_time, jobs).with_policy(policy);
        controller.max_steps = config.max_steps;
        Ok(controller)
    }

    pub fn system(&self) -> &SimulatedSystem {
        &self.system
    }

    pub fn time(&self) -> Time {
        self.system.time()
    }

    /// Jobs that arrived and are not held by any container
    pub fn pending_jobs(&self) -> &[Job] {
        &self.pending
    }

    /// Every job of the trace in arrival order
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn policy_name(&self) -> Option<&str> {
        self.policy.as_deref().map(|p| p.name())
    }

    /// No arrivals left, no wake-up pending, and nothing waiting for a container
    pub fn is_done(&self) -> bool {
        self.next_arrival >= self.jobs.len() && self.wait_until.is_none() && self.pending.is_empty()
    }

    /// Queue more jobs for arrival, e.g. from an external driver mid-run
    ///
    /// Jobs may not arrive before the current time and ids must be unique
    /// across the whole run. Nothing is queued if any job is rejected.
    pub fn add_jobs(&mut self, mut jobs: Vec<Job>) -> Result<()> {
        let now = self.system.time();
        let mut seen: HashSet<&JobId> = self.jobs.iter().map(|job| &job.id).collect();
        for job in &jobs {
            if job.receival_time < now {
                return Err(SimError::invalid_parameter(format!(
                    "job {} arrives at t={}, before t={now}",
                    job.id, job.receival_time
                )));
            }
            if !seen.insert(&job.id) {
                return Err(SimError::invalid_parameter(format!("duplicate job id {}", job.id)));
            }
        }

        let added = jobs.len();
        jobs.sort_by(Job::arrival_order);
        self.jobs.extend(jobs);
        self.jobs[self.next_arrival..].sort_by(Job::arrival_order);
        debug!(added, upcoming = self.jobs.len() - self.next_arrival, "Jobs added");
        Ok(())
    }

    /// Perform one event-loop transition
    pub fn step(&mut self) -> Result<StepOutcome> {
        if self.policy.is_none() {
            return Err(SimError::NoPolicy);
        }
        let start = self.begin_step()?;

        let Some(policy) = self.policy.as_mut() else {
            return Err(SimError::NoPolicy);
        };
        let actions = policy.determine_actions(&self.system, &self.pending);
        self.finish_step(start, actions)
    }

    /// Perform one transition applying `actions` in place of a policy decision
    ///
    /// The clock advances and arrivals are admitted exactly as in [`step`],
    /// so the actions act on the system at [`next_event_time`]. No policy
    /// needs to be attached.
    ///
    /// [`step`]: Controller::step
    /// [`next_event_time`]: Controller::next_event_time
    pub fn step_with(&mut self, actions: Vec<Action>) -> Result<StepOutcome> {
        let start = self.begin_step()?;
        self.finish_step(start, actions)
    }

    /// Time the next step will run at: the next arrival or requested wake-up
    pub fn next_event_time(&self) -> Time {
        let now = self.system.time();
        let next_arrival = self.jobs.get(self.next_arrival).map(|job| job.receival_time);
        match (next_arrival, self.wait_until) {
            (Some(arrival), Some(wait)) => arrival.min(wait),
            (Some(arrival), None) => arrival,
            (None, Some(wait)) => wait,
            (None, None) => now,
        }
        .max(now)
    }

    fn begin_step(&mut self) -> Result<StepStart> {
        if let Some(limit) = self.max_steps {
            if self.steps >= limit {
                return Err(SimError::StepLimitExceeded(limit));
            }
        }

        let now = self.system.time();
        let next_time = self.next_event_time();

        let mut arrivals = 0;
        while let Some(job) = self.jobs.get(self.next_arrival) {
            if job.receival_time > next_time {
                break;
            }
            self.pending.push(job.clone());
            self.next_arrival += 1;
            arrivals += 1;
        }
        let pending_before = self.pending.len();

        self.system.run(next_time)?;

        Ok(StepStart {
            now,
            time: next_time,
            arrivals,
            pending_before,
        })
    }

    fn finish_step(&mut self, start: StepStart, actions: Vec<Action>) -> Result<StepOutcome> {
        let next_time = start.time;
        let wait = requested_wait(&actions);
        if let Some(requested) = wait {
            if requested < next_time {
                return Err(SimError::WaitInPast {
                    requested,
                    now: next_time,
                });
            }
        }

        let action_count = actions.len();
        self.system.perform_actions(actions)?;
        self.wait_until = wait;

        let system = &self.system;
        self.pending.retain(|job| !system.is_assigned(&job.id));
        let released = self.system.take_released();
        if !released.is_empty() {
            self.pending.extend(released);
            self.pending.sort_by(Job::arrival_order);
        }

        let progressed =
            next_time > start.now || start.arrivals > 0 || self.pending.len() < start.pending_before;
        if progressed {
            self.stalled_steps = 0;
        } else {
            self.stalled_steps += 1;
            if self.stalled_steps >= STALL_LIMIT {
                return Err(SimError::NoProgress {
                    time: next_time,
                    pending: self.pending.len(),
                });
            }
        }

        self.steps += 1;
        let outcome = StepOutcome {
            time: next_time,
            cost: self.system.cost(),
            pending: self.pending.len(),
            actions: action_count,
            arrivals: start.arrivals,
        };
        debug!(
            time = outcome.time,
            cost = outcome.cost,
            pending = outcome.pending,
            actions = outcome.actions,
            arrivals = outcome.arrivals,
            wait = ?self.wait_until,
            "Step"
        );
        Ok(outcome)
    }

    /// Run to completion and report
    pub fn run(&mut self) -> Result<SimulationReport> {
        let policy_name = self.policy_name().ok_or(SimError::NoPolicy)?.to_string();
        info!(
            policy = %policy_name,
            jobs = self.jobs.len(),
            startup = self.system.startup_time(),
            "Starting simulation"
        );

        while !self.is_done() {
            self.step()?;
        }

        let flush_to = self.system.time() + self.system.time_until_done();
        self.system.run(flush_to)?;

        let completions: HashMap<&JobId, Time> = self
            .system
            .completed_jobs()
            .iter()
            .filter_map(|job| job.completion_time.map(|t| (&job.id, t)))
            .collect();
        let stamped: Vec<Option<Time>> = self
            .jobs
            .iter()
            .map(|job| completions.get(&job.id).copied())
            .collect();
        for (job, completion) in self.jobs.iter_mut().zip(stamped) {
            job.completion_time = completion;
        }

        let outcomes = self.jobs.iter().map(JobOutcome::from).collect();
        let report = SimulationReport::new(
            policy_name,
            self.system.cost(),
            self.system.containers_launched(),
            self.steps,
            outcomes,
        );

        info!(
            policy = %report.policy_name,
            cost = report.total_cost,
            completed = report.completed_jobs,
            containers = report.containers_launched,
            max_queue = report.max_queue_time,
            steps = report.steps,
            "Simulation finished"
        );
        Ok(report)
    }

    /// Drop all containers and rewind to the first arrival
    pub fn reset(&mut self) {
        self.system.reset(0);
        self.next_arrival = 0;
        self.pending.clear();
        self.wait_until = None;
        self.steps = 0;
        self.stalled_steps = 0;
        for job in &mut self.jobs {
            job.completion_time = None;
        }
        if let Some(policy) = self.policy.as_mut() {
            policy.reset();
        }
    }
}
