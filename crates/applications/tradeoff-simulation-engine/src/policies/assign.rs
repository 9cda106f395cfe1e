//! Greedy least-loaded job assignment
//!
//! Policies that spread jobs over a set of containers plan against projected
//! load: the time until a container would finish everything queued on it.
//! Each job goes to the candidate with the lowest projected load, which is
//! list scheduling when jobs are fed in arrival order.
//!
//! ## Candidates
//!
//! - **Existing**: a live container; starts at its remaining work
//! - **New**: a container the plan would activate; starts at a caller-chosen
//!   load (usually the startup delay)
//!
//! Ties go to the candidate added first, so live containers win over new ones
//! when both are equally loaded.

use crate::action::Action;
use crate::container::Container;
use crate::types::{ContainerId, ContainerMetadata, DurationEstimate, Job, Time};

/// Where a planned job would run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Existing(ContainerId),
    New,
}

#[derive(Debug, Clone)]
struct Candidate {
    slot: Slot,
    load: Time,
    jobs: Vec<Job>,
}

/// Planner that places jobs on the least-loaded candidate
#[derive(Debug, Clone)]
pub struct LeastLoadedPlanner {
    estimate: DurationEstimate,
    candidates: Vec<Candidate>,
}

impl LeastLoadedPlanner {
    /// Create a planner that sizes jobs with `estimate`
    pub fn new(estimate: DurationEstimate) -> Self {
        Self {
            estimate,
            candidates: Vec::new(),
        }
    }

    /// Add a live container at its projected remaining work
    pub fn add_existing(&mut self, container: &Container) {
        let load = container.time_until_done_using(self.estimate);
        self.add_existing_with_load(container.id(), load);
    }

    /// Add a live container with an explicit starting load
    pub fn add_existing_with_load(&mut self, id: ContainerId, load: Time) {
        self.candidates.push(Candidate {
            slot: Slot::Existing(id),
            load,
            jobs: Vec::new(),
        });
    }

    /// Add a container that would be activated by this plan
    pub fn add_new(&mut self, initial_load: Time) {
        self.candidates.push(Candidate {
            slot: Slot::New,
            load: initial_load,
            jobs: Vec::new(),
        });
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Place `job` on the least-loaded candidate.
    ///
    /// Returns the job back if there is no candidate at all.
    pub fn assign(&mut self, job: Job) -> Option<Job> {
        match self.least_loaded() {
            Some(index) => {
                self.place(index, job);
                None
            }
            None => Some(job),
        }
    }

    /// Place `job` on the least-loaded candidate if it fits under `capacity`.
    ///
    /// A candidate with no load always accepts one job. Returns the job back
    /// when it fits nowhere.
    pub fn assign_within(&mut self, job: Job, capacity: Time) -> Option<Job> {
        let Some(index) = self.least_loaded() else {
            return Some(job);
        };

        let load = self.candidates[index].load;
        if load == 0 || load + job.estimated_time(self.estimate) <= capacity {
            self.place(index, job);
            None
        } else {
            Some(job)
        }
    }

    /// Smallest positive projected load across candidates
    pub fn next_completion(&self) -> Option<Time> {
        self.candidates
            .iter()
            .map(|c| c.load)
            .filter(|load| *load > 0)
            .min()
    }

    /// Projected load per candidate, in insertion order
    pub fn loads(&self) -> Vec<(Slot, Time)> {
        self.candidates.iter().map(|c| (c.slot, c.load)).collect()
    }

    /// Turn the plan into actions.
    ///
    /// Existing containers that received jobs get an `AddJobs`. New candidates
    /// are activated with `metadata` when they received jobs, or always when
    /// `keep_empty_new` is set.
    pub fn into_actions(self, metadata: ContainerMetadata, keep_empty_new: bool) -> Vec<Action> {
        let mut actions = Vec::new();
        for candidate in self.candidates {
            match candidate.slot {
                Slot::Existing(id) if !candidate.jobs.is_empty() => {
                    actions.push(Action::add_jobs(id, candidate.jobs));
                }
                Slot::New if keep_empty_new || !candidate.jobs.is_empty() => {
                    actions.push(Action::activate_with(candidate.jobs, metadata.clone()));
                }
                _ => {}
            }
        }
        actions
    }

    fn least_loaded(&self) -> Option<usize> {
        self.candidates
            .iter()
            .enumerate()
            .min_by_key(|(index, c)| (c.load, *index))
            .map(|(index, _)| index)
    }

    fn place(&mut self, index: usize, job: Job) {
        let candidate = &mut self.candidates[index];
        candidate.load += job.estimated_time(self.estimate);
        candidate.jobs.push(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_balances_load() {
        let mut planner = LeastLoadedPlanner::new(DurationEstimate::Exact);
        planner.add_new(1);
        planner.add_new(1);

        for (id, exec) in [("a", 5), ("b", 2), ("c", 2), ("d", 1)] {
            assert!(planner.assign(Job::new(id, exec, 0)).is_none());
        }

        // a -> 0 (6), b -> 1 (3), c -> 1 (5), d -> 1 (6)
        assert_eq!(planner.loads(), vec![(Slot::New, 6), (Slot::New, 6)]);
        assert_eq!(planner.next_completion(), Some(6));
    }

    #[test]
    fn test_ties_prefer_first_candidate() {
        let mut planner = LeastLoadedPlanner::new(DurationEstimate::Exact);
        planner.add_existing_with_load(ContainerId(3), 1);
        planner.add_new(1);
        planner.assign(Job::new("a", 2, 0));

        let actions = planner.into_actions(ContainerMetadata::default(), false);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].container(), Some(ContainerId(3)));
    }

    #[test]
    fn test_assign_without_candidates_returns_job() {
        let mut planner = LeastLoadedPlanner::new(DurationEstimate::Exact);
        assert!(planner.is_empty());
        let job = planner.assign(Job::new("a", 2, 0));
        assert_eq!(job.map(|j| j.id), Some("a".into()));
    }

    #[test]
    fn test_assign_within_capacity() {
        let mut planner = LeastLoadedPlanner::new(DurationEstimate::LowerBound);
        planner.add_new(0);
        planner.add_new(0);

        assert!(planner.assign_within(Job::new("a", 9, 0).with_bounds(3, 9), 4).is_none());
        assert!(planner.assign_within(Job::new("b", 9, 0).with_bounds(3, 9), 4).is_none());
        let rejected = planner.assign_within(Job::new("c", 9, 0).with_bounds(2, 9), 4);
        assert!(rejected.is_some());

        // An empty candidate takes a job larger than the capacity
        let mut planner = LeastLoadedPlanner::new(DurationEstimate::LowerBound);
        planner.add_new(0);
        assert!(planner.assign_within(Job::new("big", 20, 0), 4).is_none());
    }

    #[test]
    fn test_into_actions_keeps_empty_new_containers() {
        let mut planner = LeastLoadedPlanner::new(DurationEstimate::Exact);
        planner.add_new(1);
        planner.add_new(1);
        planner.assign(Job::new("a", 2, 0));

        let metadata = ContainerMetadata::for_epoch(4);
        let actions = planner.clone().into_actions(metadata.clone(), false);
        assert_eq!(actions.len(), 1);

        let actions = planner.into_actions(metadata.clone(), true);
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| matches!(
            a,
            Action::ActivateContainer { metadata: m, .. } if *m == metadata
        )));
    }
}
