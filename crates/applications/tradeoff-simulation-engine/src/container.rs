//! A single worker that runs its queue serially against a virtual clock
//!
//! A container is billed from the moment it is activated. It spends the
//! system's startup delay warming up, then runs queued jobs one at a time in
//! queue order. `progress` is the time already spent on the head job.

use std::collections::VecDeque;

use crate::error::{Result, SimError};
use crate::types::{ContainerId, ContainerMetadata, DurationEstimate, Job, JobId, Time};

#[derive(Debug, Clone)]
pub struct Container {
    id: ContainerId,
    jobs: VecDeque<Job>,
    clock: Time,
    start_time: Time,
    ready_time: Time,
    progress: Time,
    metadata: ContainerMetadata,
}

impl Container {
    /// Create a container activated at `start_time` that becomes ready
    /// after `startup_time`
    pub fn new(
        id: ContainerId,
        start_time: Time,
        startup_time: Time,
        jobs: Vec<Job>,
        metadata: ContainerMetadata,
    ) -> Self {
        Container {
            id,
            jobs: jobs.into(),
            clock: start_time,
            start_time,
            ready_time: start_time + startup_time.max(0),
            progress: 0,
            metadata,
        }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn clock(&self) -> Time {
        self.clock
    }

    pub fn start_time(&self) -> Time {
        self.start_time
    }

    /// Time at which the container finishes starting up
    pub fn ready_time(&self) -> Time {
        self.ready_time
    }

    pub fn progress(&self) -> Time {
        self.progress
    }

    pub fn metadata(&self) -> &ContainerMetadata {
        &self.metadata
    }

    /// Unfinished jobs in execution order; the head may be partly done
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn queued_len(&self) -> usize {
        self.jobs.len()
    }

    pub fn has_queued_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub fn add_job(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Remove a queued job; removing the head discards its progress
    pub fn remove_job(&mut self, job_id: &JobId) -> Result<Job> {
        let index = self
            .jobs
            .iter()
            .position(|job| &job.id == job_id)
            .ok_or_else(|| SimError::JobNotQueued {
                container: self.id,
                job: job_id.clone(),
            })?;

        if index == 0 {
            self.progress = 0;
        }

        self.jobs.remove(index).ok_or_else(|| SimError::JobNotQueued {
            container: self.id,
            job: job_id.clone(),
        })
    }

    /// Replace the queue order.
    ///
    /// `order` must be a permutation of the queued job ids. Progress resets
    /// when the head job changes.
    pub fn reorder(&mut self, order: &[JobId]) -> Result<()> {
        let mut current: Vec<&JobId> = self.jobs.iter().map(|job| &job.id).collect();
        let mut requested: Vec<&JobId> = order.iter().collect();
        current.sort();
        requested.sort();
        if current != requested {
            return Err(SimError::InvalidReorder(self.id));
        }

        let old_head = self.jobs.front().map(|job| job.id.clone());

        let mut queue: Vec<Job> = self.jobs.drain(..).collect();
        for job_id in order {
            if let Some(index) = queue.iter().position(|job| &job.id == job_id) {
                self.jobs.push_back(queue.swap_remove(index));
            }
        }

        if self.jobs.front().map(|job| &job.id) != old_head.as_ref() {
            self.progress = 0;
        }
        Ok(())
    }

    /// Advance the clock to `time`, completing every job that fits.
    ///
    /// Returns the completed jobs with their completion time stamped.
    /// Running to the current clock again is a no-op.
    pub fn run(&mut self, time: Time) -> Result<Vec<Job>> {
        if time < self.clock {
            return Err(SimError::TimeReversal {
                subject: format!("container {}", self.id),
                clock: self.clock,
                requested: time,
            });
        }

        let mut completed = Vec::new();

        if self.clock < self.ready_time {
            if time < self.ready_time {
                self.clock = time;
                return Ok(completed);
            }
            self.clock = self.ready_time;
        }

        while let Some(head) = self.jobs.front() {
            let remaining = head.execution_time - self.progress;
            if self.clock + remaining > time {
                break;
            }
            if let Some(mut job) = self.jobs.pop_front() {
                self.clock += remaining;
                job.complete(self.clock);
                self.progress = 0;
                completed.push(job);
            }
        }

        if !self.jobs.is_empty() {
            self.progress += time - self.clock;
        }
        self.clock = time;

        Ok(completed)
    }

    /// Startup time still outstanding at the current clock
    pub fn startup_remaining(&self) -> Time {
        (self.ready_time - self.clock).max(0)
    }

    /// Time until every queued job is done, using true execution times
    pub fn time_until_done(&self) -> Time {
        self.time_until_done_using(DurationEstimate::Exact)
    }

    /// Time until every queued job is done under an execution-time estimate.
    ///
    /// Includes outstanding startup. Estimates that undershoot the progress
    /// already made clamp to zero.
    pub fn time_until_done_using(&self, estimate: DurationEstimate) -> Time {
        let work: Time = self
            .jobs
            .iter()
            .map(|job| job.estimated_time(estimate))
            .sum();
        self.startup_remaining() + (work - self.progress).max(0)
    }

    pub fn is_done(&self) -> bool {
        self.time_until_done() == 0
    }

    /// Billable time so far
    pub fn alive_time(&self) -> Time {
        self.clock - self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_with(jobs: Vec<Job>, startup: Time) -> Container {
        Container::new(ContainerId(0), 0, startup, jobs, ContainerMetadata::default())
    }

    #[test]
    fn test_run_completes_jobs_in_order() {
        let mut container = container_with(vec![Job::new("a", 3, 0), Job::new("b", 4, 0)], 0);

        let done = container.run(5).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id.as_str(), "a");
        assert_eq!(done[0].completion_time, Some(3));
        assert_eq!(container.progress(), 2);
        assert_eq!(container.time_until_done(), 2);

        let done = container.run(7).unwrap();
        assert_eq!(done[0].completion_time, Some(7));
        assert!(container.is_done());
        assert_eq!(container.alive_time(), 7);
    }

    #[test]
    fn test_progress_accumulates_across_partial_runs() {
        let mut container = container_with(vec![Job::new("long", 10, 0)], 0);

        container.run(3).unwrap();
        container.run(5).unwrap();
        assert_eq!(container.progress(), 5);
        assert_eq!(container.time_until_done(), 5);

        let done = container.run(10).unwrap();
        assert_eq!(done[0].completion_time, Some(10));
    }

    #[test]
    fn test_startup_delays_first_job() {
        let mut container = container_with(vec![Job::new("a", 5, 0)], 1);
        assert_eq!(container.time_until_done(), 6);

        assert!(container.run(1).unwrap().is_empty());
        assert_eq!(container.progress(), 0);
        assert_eq!(container.startup_remaining(), 0);

        let done = container.run(6).unwrap();
        assert_eq!(done[0].completion_time, Some(6));
        assert_eq!(container.alive_time(), 6);
    }

    #[test]
    fn test_empty_container_is_busy_while_starting() {
        let mut container = container_with(vec![], 2);
        assert!(!container.is_done());
        assert_eq!(container.time_until_done(), 2);

        container.run(2).unwrap();
        assert!(container.is_done());
    }

    #[test]
    fn test_run_is_idempotent() {
        let mut container = container_with(vec![Job::new("a", 2, 0), Job::new("b", 6, 0)], 1);

        let first = container.run(5).unwrap();
        let progress = container.progress();
        let second = container.run(5).unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(container.progress(), progress);
    }

    #[test]
    fn test_run_backward_is_rejected() {
        let mut container = container_with(vec![Job::new("a", 2, 0)], 0);
        container.run(4).unwrap();

        let err = container.run(3).unwrap_err();
        assert!(matches!(err, SimError::TimeReversal { clock: 4, requested: 3, .. }));
    }

    #[test]
    fn test_remove_head_resets_progress() {
        let mut container = container_with(vec![Job::new("a", 5, 0), Job::new("b", 5, 0)], 0);
        container.run(2).unwrap();

        let removed = container.remove_job(&JobId::from("b")).unwrap();
        assert_eq!(removed.id.as_str(), "b");
        assert_eq!(container.progress(), 2);

        container.remove_job(&JobId::from("a")).unwrap();
        assert_eq!(container.progress(), 0);
        assert!(container.remove_job(&JobId::from("a")).is_err());
    }

    #[test]
    fn test_reorder_resets_progress_only_when_head_changes() {
        let mut container = container_with(
            vec![Job::new("a", 5, 0), Job::new("b", 5, 0), Job::new("c", 5, 0)],
            0,
        );
        container.run(2).unwrap();

        container
            .reorder(&[JobId::from("a"), JobId::from("c"), JobId::from("b")])
            .unwrap();
        assert_eq!(container.progress(), 2);

        container
            .reorder(&[JobId::from("c"), JobId::from("a"), JobId::from("b")])
            .unwrap();
        assert_eq!(container.progress(), 0);
        let ids: Vec<&str> = container.jobs().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_reorder_must_be_permutation() {
        let mut container = container_with(vec![Job::new("a", 5, 0), Job::new("b", 5, 0)], 0);

        assert!(container.reorder(&[JobId::from("a")]).is_err());
        assert!(container.reorder(&[JobId::from("a"), JobId::from("z")]).is_err());
        assert_eq!(container.queued_len(), 2);
    }

    #[test]
    fn test_time_until_done_using_bounds() {
        let mut container = container_with(
            vec![
                Job::new("a", 4, 0).with_bounds(2, 6),
                Job::new("b", 4, 0).with_bounds(3, 5),
            ],
            0,
        );
        container.run(3).unwrap();

        assert_eq!(container.time_until_done(), 5);
        assert_eq!(container.time_until_done_using(DurationEstimate::UpperBound), 8);
        // Lower bounds undershoot the head's progress but not the total
        assert_eq!(container.time_until_done_using(DurationEstimate::LowerBound), 2);
    }
}
