//! The simulated cluster: live containers, billing, and action application

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::action::Action;
use crate::container::Container;
use crate::error::{Result, SimError};
use crate::types::{ContainerId, ContainerMetadata, DurationEstimate, Job, JobId, Time};

/// Set of live containers plus the cost already banked by terminated ones
#[derive(Debug, Clone)]
pub struct SimulatedSystem {
    containers: BTreeMap<ContainerId, Container>,
    time: Time,
    startup_time: Time,
    accrued_cost: Time,

    // Jobs handed to a container that have not completed
    assigned: HashSet<JobId>,
    completed: Vec<Job>,
    released: Vec<Job>,

    next_container_id: u64,
    containers_launched: usize,
}

impl SimulatedSystem {
    /// Create an empty system where every container needs `startup_time`
    /// before it runs its first job
    pub fn new(startup_time: Time) -> Self {
        SimulatedSystem {
            containers: BTreeMap::new(),
            time: 0,
            startup_time: startup_time.max(0),
            accrued_cost: 0,
            assigned: HashSet::new(),
            completed: Vec::new(),
            released: Vec::new(),
            next_container_id: 0,
            containers_launched: 0,
        }
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn startup_time(&self) -> Time {
        self.startup_time
    }

    /// Apply a policy's actions in order.
    ///
    /// `Wait` is the controller's concern and is ignored here.
    pub fn perform_actions(&mut self, actions: Vec<Action>) -> Result<()> {
        for action in actions {
            debug!(time = self.time, action = action.kind(), "Applying action");
            match action {
                Action::ActivateContainer { jobs, metadata } => {
                    self.activate_container(jobs, metadata);
                }
                Action::TerminateContainer(id) => self.terminate_container(id)?,
                Action::AddJobs { container, jobs } => self.assign_jobs(container, jobs)?,
                Action::RemoveJobs { container, jobs } => self.remove_jobs(container, &jobs)?,
                Action::ReorderJobs { container, order } => self.reorder_jobs(container, &order)?,
                Action::Wait(_) => {}
            }
        }
        Ok(())
    }

    /// Start a container at the current time and return its handle
    pub fn activate_container(&mut self, jobs: Vec<Job>, metadata: ContainerMetadata) -> ContainerId {
        let id = ContainerId(self.next_container_id);
        self.next_container_id += 1;
        self.containers_launched += 1;

        self.assigned.extend(jobs.iter().map(|job| job.id.clone()));
        debug!(time = self.time, container = %id, jobs = jobs.len(), "Container activated");

        let container = Container::new(id, self.time, self.startup_time, jobs, metadata);
        self.containers.insert(id, container);
        id
    }

    /// Stop a container and bank its alive time.
    ///
    /// Containers that still hold unfinished jobs cannot be terminated.
    pub fn terminate_container(&mut self, id: ContainerId) -> Result<()> {
        let container = self
            .containers
            .get(&id)
            .ok_or(SimError::UnknownContainer(id))?;

        if container.has_queued_jobs() {
            return Err(SimError::TerminateWithPendingWork {
                container: id,
                jobs: container.queued_len(),
            });
        }

        if let Some(container) = self.containers.remove(&id) {
            self.accrued_cost += container.alive_time();
            debug!(
                time = self.time,
                container = %id,
                alive = container.alive_time(),
                "Container terminated"
            );
        }
        Ok(())
    }

    /// Append jobs to a live container's queue
    pub fn assign_jobs(&mut self, id: ContainerId, jobs: Vec<Job>) -> Result<()> {
        let container = self
            .containers
            .get_mut(&id)
            .ok_or(SimError::UnknownContainer(id))?;

        for job in jobs {
            self.assigned.insert(job.id.clone());
            container.add_job(job);
        }
        Ok(())
    }

    /// Pull queued jobs out of a container; they become pending again
    pub fn remove_jobs(&mut self, id: ContainerId, job_ids: &[JobId]) -> Result<()> {
        let container = self
            .containers
            .get_mut(&id)
            .ok_or(SimError::UnknownContainer(id))?;

        for job_id in job_ids {
            let job = container.remove_job(job_id)?;
            self.assigned.remove(&job.id);
            self.released.push(job);
        }
        Ok(())
    }

    pub fn reorder_jobs(&mut self, id: ContainerId, order: &[JobId]) -> Result<()> {
        self.containers
            .get_mut(&id)
            .ok_or(SimError::UnknownContainer(id))?
            .reorder(order)
    }

    /// Advance every container to `time` and collect completions
    pub fn run(&mut self, time: Time) -> Result<()> {
        if time < self.time {
            return Err(SimError::TimeReversal {
                subject: "system".to_string(),
                clock: self.time,
                requested: time,
            });
        }

        for container in self.containers.values_mut() {
            for job in container.run(time)? {
                debug!(time = job.completion_time, job = %job.id, container = %container.id(), "Job completed");
                self.assigned.remove(&job.id);
                self.completed.push(job);
            }
        }

        self.time = time;
        Ok(())
    }

    /// Banked cost plus the alive time of every live container
    pub fn cost(&self) -> Time {
        self.accrued_cost
            + self
                .containers
                .values()
                .map(Container::alive_time)
                .sum::<Time>()
    }

    /// Time until every live container is done
    pub fn time_until_done(&self) -> Time {
        self.time_until_done_using(DurationEstimate::Exact)
    }

    pub fn time_until_done_using(&self, estimate: DurationEstimate) -> Time {
        self.containers
            .values()
            .map(|c| c.time_until_done_using(estimate))
            .max()
            .unwrap_or(0)
    }

    pub fn is_done(&self) -> bool {
        self.time_until_done() == 0
    }

    /// Live containers in activation order
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.get(&id)
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Ids of jobs held by a container and not yet completed
    pub fn assigned_jobs(&self) -> &HashSet<JobId> {
        &self.assigned
    }

    pub fn is_assigned(&self, job_id: &JobId) -> bool {
        self.assigned.contains(job_id)
    }

    /// Jobs completed so far, in completion order
    pub fn completed_jobs(&self) -> &[Job] {
        &self.completed
    }

    /// Drain jobs pulled back by `RemoveJobs` since the last call
    pub fn take_released(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.released)
    }

    pub fn containers_launched(&self) -> usize {
        self.containers_launched
    }

    /// Drop all state and restart the clock at `time`
    pub fn reset(&mut self, time: Time) {
        self.containers.clear();
        self.assigned.clear();
        self.completed.clear();
        self.released.clear();
        self.time = time;
        self.accrued_cost = 0;
        self.next_container_id = 0;
        self.containers_launched = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_and_run_bills_from_activation() {
        let mut system = SimulatedSystem::new(1);
        let id = system.activate_container(vec![Job::new("j1", 5, 0)], ContainerMetadata::default());

        assert_eq!(system.time_until_done(), 6);
        assert!(system.is_assigned(&JobId::from("j1")));

        system.run(6).unwrap();
        assert_eq!(system.completed_jobs()[0].completion_time, Some(6));
        assert!(!system.is_assigned(&JobId::from("j1")));
        assert!(system.is_done());

        system.terminate_container(id).unwrap();
        assert_eq!(system.cost(), 6);
        assert_eq!(system.container_count(), 0);
    }

    #[test]
    fn test_cost_counts_live_containers() {
        let mut system = SimulatedSystem::new(0);
        system.activate_container(vec![], ContainerMetadata::default());
        system.run(3).unwrap();
        system.activate_container(vec![], ContainerMetadata::default());
        system.run(5).unwrap();

        assert_eq!(system.cost(), 5 + 2);
        assert_eq!(system.containers_launched(), 2);
    }

    #[test]
    fn test_terminate_with_pending_work_is_rejected() {
        let mut system = SimulatedSystem::new(0);
        let id = system.activate_container(vec![Job::new("j1", 5, 0)], ContainerMetadata::default());

        let err = system.terminate_container(id).unwrap_err();
        assert!(matches!(err, SimError::TerminateWithPendingWork { jobs: 1, .. }));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_unknown_container_actions_fail() {
        let mut system = SimulatedSystem::new(0);
        let id = system.activate_container(vec![], ContainerMetadata::default());
        system.terminate_container(id).unwrap();

        // Handles are never reused
        let next = system.activate_container(vec![], ContainerMetadata::default());
        assert_ne!(id, next);

        assert!(matches!(
            system.perform_actions(vec![Action::add_jobs(id, vec![Job::new("x", 1, 0)])]),
            Err(SimError::UnknownContainer(_))
        ));
        assert!(system.terminate_container(id).is_err());
    }

    #[test]
    fn test_remove_jobs_releases_them() {
        let mut system = SimulatedSystem::new(0);
        let id = system.activate_container(
            vec![Job::new("a", 3, 0), Job::new("b", 3, 0)],
            ContainerMetadata::default(),
        );

        system
            .perform_actions(vec![Action::RemoveJobs {
                container: id,
                jobs: vec![JobId::from("b")],
            }])
            .unwrap();

        let released = system.take_released();
        assert_eq!(released.len(), 1);
        assert!(!system.is_assigned(&JobId::from("b")));
        assert!(system.take_released().is_empty());
        assert_eq!(system.time_until_done(), 3);
    }

    #[test]
    fn test_run_backward_is_rejected() {
        let mut system = SimulatedSystem::new(0);
        system.run(4).unwrap();
        assert!(matches!(system.run(2), Err(SimError::TimeReversal { .. })));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut system = SimulatedSystem::new(2);
        system.activate_container(vec![Job::new("a", 3, 0)], ContainerMetadata::default());
        system.run(10).unwrap();

        system.reset(0);
        assert_eq!(system.cost(), 0);
        assert_eq!(system.container_count(), 0);
        assert!(system.completed_jobs().is_empty());
        assert_eq!(system.startup_time(), 2);
    }
}
