//! Scheduling policies for container autoscaling
//!
//! Implements the policies to compare:
//! - FIFO: fixed worker count, greedy least-loaded assignment
//! - KJD1: known durations, threshold batching
//! - KJD2: known durations, sliding-window packing
//! - UJD1: unknown durations, epoch doubling
//! - UJD2: unknown durations, sliding-window packing on upper bounds
//! - RL: pretrained target-count model behind the same interface
//!
//! Policies are resolved by name through [`PolicyRegistry`].

pub mod assign;
pub mod fifo;
pub mod kjd1;
pub mod kjd2;
pub mod rl;
pub mod ujd1;
pub mod ujd2;

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::action::Action;
use crate::error::{Result, SimError};
use crate::system::SimulatedSystem;
use crate::types::{ContainerId, DurationEstimate, Job, Time};

pub use fifo::FifoPolicy;
pub use kjd1::Kjd1Policy;
pub use kjd2::{Kjd2Policy, SlidingWindowPolicy};
pub use rl::RlPolicy;
pub use ujd1::Ujd1Policy;
pub use ujd2::Ujd2Policy;

/// Scheduling policy trait
pub trait SchedulingPolicy: Send {
    /// Decide what to do given the current system and the jobs nobody holds yet.
    ///
    /// Must only read its inputs; every change to the system goes through the
    /// returned actions.
    fn determine_actions(&mut self, system: &SimulatedSystem, pending_jobs: &[Job]) -> Vec<Action>;

    /// Get policy name
    fn name(&self) -> &str;

    /// Forget per-run state before the controller replays a trace
    fn reset(&mut self) {}
}

/// Builds a policy from its string parameters
pub type PolicyFactory = fn(&[String]) -> Result<Box<dyn SchedulingPolicy>>;

struct RegisteredPolicy {
    params: &'static str,
    factory: PolicyFactory,
}

/// Maps policy names to constructors
pub struct PolicyRegistry {
    policies: BTreeMap<String, RegisteredPolicy>,
}

impl PolicyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        PolicyRegistry {
            policies: BTreeMap::new(),
        }
    }

    /// Registry with every built-in policy
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("fifo", "<workers>", |params| {
            Ok(Box::new(FifoPolicy::from_params(params)?))
        });
        registry.register("kjd1", "<epsilon>", |params| {
            Ok(Box::new(Kjd1Policy::from_params(params)?))
        });
        registry.register("kjd2", "<epsilon>", |params| {
            Ok(Box::new(Kjd2Policy::from_params(params)?))
        });
        registry.register("ujd1", "<epsilon>", |params| {
            Ok(Box::new(Ujd1Policy::from_params(params)?))
        });
        registry.register("ujd2", "<epsilon>", |params| {
            Ok(Box::new(Ujd2Policy::from_params(params)?))
        });
        registry.register("rl", "<model.json>,<max_containers>", |params| {
            Ok(Box::new(RlPolicy::from_params(params)?))
        });
        registry
    }

    /// Register a policy under a case-insensitive name
    pub fn register(&mut self, name: &str, params: &'static str, factory: PolicyFactory) {
        self.policies
            .insert(name.to_lowercase(), RegisteredPolicy { params, factory });
    }

    /// Construct the named policy
    pub fn build(&self, name: &str, params: &[String]) -> Result<Box<dyn SchedulingPolicy>> {
        let entry = self
            .policies
            .get(&name.to_lowercase())
            .ok_or_else(|| SimError::UnknownPolicy(name.to_string()))?;
        (entry.factory)(params)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(&name.to_lowercase())
    }

    /// Registered names with their parameter hints, sorted by name
    pub fn entries(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.policies
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.params))
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Parse the tradeoff knob from the first parameter; must lie in (0, 1]
pub fn parse_epsilon(params: &[String], policy: &str) -> Result<f64> {
    let raw = params
        .first()
        .ok_or_else(|| SimError::invalid_parameter(format!("{policy} expects an epsilon")))?;
    let epsilon: f64 = raw.trim().parse().map_err(|_| {
        SimError::invalid_parameter(format!("{policy}: epsilon '{raw}' is not a number"))
    })?;

    if !(epsilon > 0.0 && epsilon <= 1.0) {
        return Err(SimError::invalid_parameter(format!(
            "{policy}: epsilon must be in (0, 1], got {epsilon}"
        )));
    }
    Ok(epsilon)
}

/// Truncate a derived window length to whole ticks, never negative
pub fn window(length: f64) -> Time {
    if length.is_finite() {
        (length.trunc() as Time).max(0)
    } else {
        0
    }
}

/// Clone `jobs` into arrival order
pub fn sorted_by_arrival(jobs: &[Job]) -> Vec<Job> {
    let mut sorted = jobs.to_vec();
    sorted.sort_by(Job::arrival_order);
    sorted
}

/// Total planned work of `jobs` under an estimate
pub fn volume(jobs: &[Job], estimate: DurationEstimate) -> Time {
    jobs.iter().map(|job| job.estimated_time(estimate)).sum()
}

/// Terminate containers left idle by `actions` and find the next wake-up.
///
/// Every live container that is done and receives no jobs in `actions` gets a
/// terminate appended. All other containers, and containers `actions` is
/// about to activate, project their remaining work under `estimate`. A
/// projection of zero for a container that is still busy (its lower bounds
/// are used up) falls back to the upper-bound projection. The smallest
/// projection (at least one tick) is returned as a delay from now.
pub fn retire_idle_containers(
    system: &SimulatedSystem,
    actions: &mut Vec<Action>,
    estimate: DurationEstimate,
) -> Option<Time> {
    let project = |planned: Time, worst: Time| {
        if planned > 0 { planned } else { worst.max(1) }
    };

    // Added work per container, under `estimate` and under upper bounds
    let mut added: HashMap<ContainerId, (Time, Time)> = HashMap::new();
    let mut terminating: HashSet<ContainerId> = HashSet::new();
    let mut next: Option<Time> = None;

    for action in actions.iter() {
        match action {
            Action::AddJobs { container, jobs } => {
                let entry = added.entry(*container).or_default();
                entry.0 += volume(jobs, estimate);
                entry.1 += volume(jobs, DurationEstimate::UpperBound);
            }
            Action::ActivateContainer { jobs, .. } => {
                let startup = system.startup_time();
                let projected = project(
                    startup + volume(jobs, estimate),
                    startup + volume(jobs, DurationEstimate::UpperBound),
                );
                next = Some(next.map_or(projected, |n| n.min(projected)));
            }
            Action::TerminateContainer(id) => {
                terminating.insert(*id);
            }
            _ => {}
        }
    }

    let mut retired = Vec::new();
    for container in system.containers() {
        let id = container.id();
        if terminating.contains(&id) {
            continue;
        }

        match added.get(&id) {
            None if container.is_done() => retired.push(Action::terminate(id)),
            extra => {
                let (planned, worst) = extra.copied().unwrap_or((0, 0));
                let projected = project(
                    container.time_until_done_using(estimate) + planned,
                    container.time_until_done_using(DurationEstimate::UpperBound) + worst,
                );
                next = Some(next.map_or(projected, |n| n.min(projected)));
            }
        }
    }

    actions.extend(retired);
    next
}

/// Earliest of two optional wake-up times
pub fn earliest(a: Option<Time>, b: Option<Time>) -> Option<Time> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContainerMetadata;

    #[test]
    fn test_registry_builds_defaults() {
        let registry = PolicyRegistry::with_defaults();
        let policy = registry.build("KJD1", &["0.5".to_string()]).unwrap();
        assert_eq!(policy.name(), "KJD1");

        let names: Vec<&str> = registry.entries().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["fifo", "kjd1", "kjd2", "rl", "ujd1", "ujd2"]);
    }

    #[test]
    fn test_registry_rejects_unknown_policy() {
        let registry = PolicyRegistry::with_defaults();
        assert!(matches!(
            registry.build("lottery", &[]),
            Err(SimError::UnknownPolicy(name)) if name == "lottery"
        ));
    }

    #[test]
    fn test_parse_epsilon_bounds() {
        assert_eq!(parse_epsilon(&["0.25".to_string()], "kjd1").unwrap(), 0.25);
        assert_eq!(parse_epsilon(&["1".to_string()], "kjd1").unwrap(), 1.0);
        assert!(parse_epsilon(&["0".to_string()], "kjd1").is_err());
        assert!(parse_epsilon(&["1.5".to_string()], "kjd1").is_err());
        assert!(parse_epsilon(&["abc".to_string()], "kjd1").is_err());
        assert!(parse_epsilon(&[], "kjd1").is_err());
    }

    #[test]
    fn test_window_truncates() {
        assert_eq!(window(6.9), 6);
        assert_eq!(window(0.0), 0);
        assert_eq!(window(-2.5), 0);
        assert_eq!(window(f64::INFINITY), 0);
    }

    #[test]
    fn test_retire_idle_containers() {
        let mut system = SimulatedSystem::new(1);
        let idle = system.activate_container(vec![], ContainerMetadata::default());
        let busy = system.activate_container(vec![Job::new("a", 4, 0)], ContainerMetadata::default());
        let fed = system.activate_container(vec![], ContainerMetadata::default());
        system.run(2).unwrap();

        let mut actions = vec![Action::add_jobs(fed, vec![Job::new("b", 5, 2)])];
        let next = retire_idle_containers(&system, &mut actions, DurationEstimate::Exact);

        assert!(actions.contains(&Action::terminate(idle)));
        assert!(!actions.contains(&Action::terminate(busy)));
        assert!(!actions.contains(&Action::terminate(fed)));
        // busy has 3 ticks of its job left
        assert_eq!(next, Some(3));
    }

    #[test]
    fn test_retire_counts_new_containers() {
        let system = SimulatedSystem::new(2);
        let mut actions = vec![Action::activate(vec![Job::new("a", 4, 0)])];
        assert_eq!(
            retire_idle_containers(&system, &mut actions, DurationEstimate::Exact),
            Some(6)
        );
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_retire_falls_back_to_upper_bound_when_lower_is_spent() {
        let mut system = SimulatedSystem::new(1);
        system.activate_container(
            vec![Job::new("a", 2000, 0).with_bounds(1, 2500)],
            ContainerMetadata::default(),
        );
        system.run(3).unwrap();

        // Lower bound 1 is used up after 2 ticks of progress
        let mut actions = Vec::new();
        let next = retire_idle_containers(&system, &mut actions, DurationEstimate::LowerBound);
        assert_eq!(next, Some(2498));
        assert!(actions.is_empty());
    }
}
