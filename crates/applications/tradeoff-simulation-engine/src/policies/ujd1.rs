//! Unknown job durations, epoch doubling
//!
//! Time is cut into epochs of length `E = 4δ/ε` and each job belongs to the
//! epoch it arrived in. When an epoch closes, its jobs are sized by their
//! lower bounds and the policy commits to `m = ceil(volume / E)` containers,
//! each holding at most `E` of lower-bound work. Jobs that do not fit stay
//! pending. One window (`δ + E`) later the epoch is reviewed: leftovers go to
//! the epoch's live containers if they have room, otherwise the epoch gets
//! another `estimate` containers and its estimate doubles.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::assign::LeastLoadedPlanner;
use super::{SchedulingPolicy, earliest, parse_epsilon, retire_idle_containers, sorted_by_arrival, volume, window};
use crate::action::Action;
use crate::error::Result;
use crate::system::SimulatedSystem;
use crate::types::{ContainerId, ContainerMetadata, DurationEstimate, Job, Time};

/// Capacity bookkeeping for one closed epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochWindow {
    /// Containers committed at the last decision
    pub estimate: usize,
    /// When leftover jobs are reconsidered
    pub next_review: Time,
    /// Whether the last decision left jobs unplaced
    pub saturated: bool,
}

/// Per-epoch state carried across calls
#[derive(Debug, Clone, Default)]
pub struct Ujd1State {
    windows: BTreeMap<u64, EpochWindow>,
}

impl Ujd1State {
    pub fn window(&self, epoch: u64) -> Option<&EpochWindow> {
        self.windows.get(&epoch)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

pub struct Ujd1Policy {
    epsilon: f64,
    state: Ujd1State,
}

impl Ujd1Policy {
    pub fn new(epsilon: f64) -> Self {
        Ujd1Policy {
            epsilon,
            state: Ujd1State::default(),
        }
    }

    /// Parameters: `[epsilon]`
    pub fn from_params(params: &[String]) -> Result<Self> {
        Ok(Self::new(parse_epsilon(params, "ujd1")?))
    }

    /// Epoch length `E` for a given startup delay, at least one tick since
    /// arrivals are bucketed by `receival / E`
    pub fn epoch_length(&self, startup_time: Time) -> Time {
        window(4.0 * startup_time as f64 / self.epsilon).max(1)
    }

    /// Current container estimate for an epoch that has closed
    pub fn epoch_estimate(&self, epoch: u64) -> Option<usize> {
        self.state.window(epoch).map(|w| w.estimate)
    }

    pub fn state(&self) -> &Ujd1State {
        &self.state
    }

    fn epoch_of(job: &Job, length: Time) -> u64 {
        job.epoch
            .unwrap_or_else(|| u64::try_from(job.receival_time / length).unwrap_or(0))
    }
}

/// Pack `jobs` onto existing epoch containers plus `new` fresh ones, each
/// capped at `capacity` lower-bound work. Returns the actions and how many
/// jobs fit nowhere.
fn pack(
    jobs: Vec<Job>,
    existing: &[(ContainerId, Time)],
    new: usize,
    capacity: Time,
    epoch: u64,
) -> (Vec<Action>, usize) {
    let mut planner = LeastLoadedPlanner::new(DurationEstimate::LowerBound);
    for (id, load) in existing {
        planner.add_existing_with_load(*id, *load);
    }
    for _ in 0..new {
        planner.add_new(0);
    }

    let leftover = jobs
        .into_iter()
        .filter_map(|job| planner.assign_within(job, capacity))
        .count();

    (
        planner.into_actions(ContainerMetadata::for_epoch(epoch), true),
        leftover,
    )
}

impl SchedulingPolicy for Ujd1Policy {
    fn determine_actions(&mut self, system: &SimulatedSystem, pending_jobs: &[Job]) -> Vec<Action> {
        let now = system.time();
        let startup = system.startup_time();
        let length = self.epoch_length(startup);

        let mut groups: BTreeMap<u64, Vec<Job>> = BTreeMap::new();
        for job in sorted_by_arrival(pending_jobs) {
            let epoch = Self::epoch_of(&job, length);
            groups.entry(epoch).or_default().push(job.with_epoch(epoch));
        }
        let active: BTreeSet<u64> = groups.keys().copied().collect();

        let mut actions = Vec::new();
        let mut wake = None;

        for (epoch, jobs) in groups {
            let closes_at = (epoch as Time + 1) * length;
            if now < closes_at {
                wake = earliest(wake, Some(closes_at));
                continue;
            }

            let existing: Vec<(ContainerId, Time)> = system
                .containers()
                .filter(|c| c.metadata().epoch == Some(epoch))
                .map(|c| {
                    let work = c.time_until_done_using(DurationEstimate::LowerBound) - c.startup_remaining();
                    (c.id(), work.max(0))
                })
                .collect();

            match self.state.windows.get_mut(&epoch) {
                None => {
                    let lower = volume(&jobs, DurationEstimate::LowerBound);
                    let estimate = usize::try_from((lower + length - 1) / length)
                        .unwrap_or(0)
                        .max(1);

                    let (plan, leftover) = pack(jobs, &existing, estimate, length, epoch);
                    debug!(epoch, estimate, leftover, time = now, "Epoch closed");

                    let window = EpochWindow {
                        estimate,
                        next_review: now + startup + length,
                        saturated: leftover > 0,
                    };
                    if window.saturated {
                        wake = earliest(wake, Some(window.next_review));
                    }
                    self.state.windows.insert(epoch, window);
                    actions.extend(plan);
                }
                Some(window) if now < window.next_review => {
                    wake = earliest(wake, Some(window.next_review));
                }
                Some(window) => {
                    let (plan, leftover) = pack(jobs.clone(), &existing, 0, length, epoch);
                    let (plan, leftover) = if leftover == 0 {
                        (plan, leftover)
                    } else {
                        let doubled = pack(jobs, &existing, window.estimate, length, epoch);
                        window.estimate = window.estimate.saturating_mul(2);
                        doubled
                    };
                    debug!(epoch, estimate = window.estimate, leftover, time = now, "Epoch reviewed");

                    window.next_review = now + startup + length;
                    window.saturated = leftover > 0;
                    if window.saturated {
                        wake = earliest(wake, Some(window.next_review));
                    }
                    actions.extend(plan);
                }
            }
        }

        self.state.windows.retain(|epoch, _| {
            active.contains(epoch)
                || system.containers().any(|c| c.metadata().epoch == Some(*epoch))
        });

        let stale = retire_idle_containers(system, &mut actions, DurationEstimate::LowerBound);
        if let Some(at) = earliest(wake, stale.map(|delay| now + delay)) {
            actions.push(Action::Wait(at));
        }
        actions
    }

    fn name(&self) -> &str {
        "UJD1"
    }

    fn reset(&mut self) {
        self.state = Ujd1State::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{activation_count, requested_wait};

    fn bounded(id: &str, lower: Time, receival: Time) -> Job {
        Job::new(id, lower, receival).with_bounds(lower, lower * 2)
    }

    #[test]
    fn test_epoch_length() {
        assert_eq!(Ujd1Policy::new(1.0).epoch_length(1), 4);
        assert_eq!(Ujd1Policy::new(0.5).epoch_length(2), 16);
        assert_eq!(Ujd1Policy::new(0.5).epoch_length(0), 1);
    }

    #[test]
    fn test_open_epoch_waits_for_boundary() {
        let mut policy = Ujd1Policy::new(1.0);
        let mut system = SimulatedSystem::new(1);
        system.run(1).unwrap();

        let actions = policy.determine_actions(&system, &[bounded("a", 3, 1)]);
        assert_eq!(activation_count(&actions), 0);
        assert_eq!(requested_wait(&actions), Some(4));
        assert!(policy.state().is_empty());
    }

    #[test]
    fn test_closed_epoch_launches_estimate() {
        let mut policy = Ujd1Policy::new(1.0);
        let mut system = SimulatedSystem::new(1);
        system.run(4).unwrap();

        let jobs = [bounded("a", 3, 0), bounded("b", 3, 1), bounded("c", 2, 2)];
        let actions = policy.determine_actions(&system, &jobs);

        // ceil(8 / 4) = 2 containers; c does not fit beside a 3
        assert_eq!(activation_count(&actions), 2);
        assert_eq!(policy.epoch_estimate(0), Some(2));
        let window = policy.state().window(0).cloned();
        assert_eq!(
            window,
            Some(EpochWindow {
                estimate: 2,
                next_review: 9,
                saturated: true
            })
        );
        assert!(actions.iter().all(|a| match a {
            Action::ActivateContainer { metadata, jobs } => {
                metadata.epoch == Some(0) && jobs.iter().all(|j| j.epoch == Some(0))
            }
            _ => true,
        }));
    }

    #[test]
    fn test_review_doubles_when_still_saturated() {
        let mut policy = Ujd1Policy::new(1.0);
        let mut system = SimulatedSystem::new(1);
        system.run(4).unwrap();

        let jobs = [bounded("a", 3, 0), bounded("b", 3, 1), bounded("c", 2, 2)];
        let actions = policy.determine_actions(&system, &jobs);
        system.perform_actions(actions).unwrap();

        // Before the review nothing changes
        system.run(6).unwrap();
        let actions = policy.determine_actions(&system, &[bounded("c", 2, 2)]);
        assert_eq!(activation_count(&actions), 0);
        assert_eq!(requested_wait(&actions), Some(8));

        // Drop the drained containers so the review finds no room
        system.run(9).unwrap();
        let ids: Vec<ContainerId> = system.containers().map(|c| c.id()).collect();
        let retired: Vec<Action> = ids.into_iter().map(Action::terminate).collect();
        system.perform_actions(retired).unwrap();

        let actions = policy.determine_actions(&system, &[bounded("c", 2, 2)]);
        assert_eq!(activation_count(&actions), 2);
        assert_eq!(policy.epoch_estimate(0), Some(4));
    }

    #[test]
    fn test_review_reuses_room_without_doubling() {
        let mut policy = Ujd1Policy::new(1.0);
        let mut system = SimulatedSystem::new(1);
        system.run(4).unwrap();

        let jobs = [bounded("a", 3, 0), bounded("b", 3, 1), bounded("c", 2, 2)];
        let actions = policy.determine_actions(&system, &jobs);
        system.perform_actions(actions).unwrap();

        // At t = 9 both containers have drained but are still live
        system.run(9).unwrap();
        let actions = policy.determine_actions(&system, &[bounded("c", 2, 2)]);
        assert_eq!(activation_count(&actions), 0);
        assert!(actions.iter().any(|a| matches!(a, Action::AddJobs { .. })));
        assert_eq!(policy.epoch_estimate(0), Some(2));
    }

    #[test]
    fn test_unsaturated_epoch_is_pruned_after_draining() {
        let mut policy = Ujd1Policy::new(1.0);
        let mut system = SimulatedSystem::new(1);
        system.run(4).unwrap();

        let actions = policy.determine_actions(&system, &[bounded("a", 2, 0), bounded("b", 2, 1)]);
        assert_eq!(activation_count(&actions), 1);
        assert_eq!(policy.epoch_estimate(0), Some(1));
        system.perform_actions(actions).unwrap();

        system.run(9).unwrap();
        let actions = policy.determine_actions(&system, &[]);
        system.perform_actions(actions).unwrap();
        assert_eq!(system.container_count(), 0);

        policy.determine_actions(&system, &[]);
        assert!(policy.state().is_empty());
    }

    #[test]
    fn test_reset_clears_windows() {
        let mut policy = Ujd1Policy::new(1.0);
        let mut system = SimulatedSystem::new(1);
        system.run(4).unwrap();
        policy.determine_actions(&system, &[bounded("a", 2, 0)]);
        assert_eq!(policy.state().len(), 1);

        policy.reset();
        assert!(policy.state().is_empty());
    }
}
