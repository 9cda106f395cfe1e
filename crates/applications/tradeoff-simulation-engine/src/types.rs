//! Core types for the simulation engine

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Simulated time, in integer ticks
pub type Time = i64;

/// Unique job identifier, as written in the job trace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        JobId(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        JobId(id)
    }
}

/// Handle issued by the system when a container is activated.
///
/// Handles increase monotonically and are never reused within a run, so a
/// stale handle always fails lookup instead of aliasing a newer container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Which execution-time figure a planner relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationEstimate {
    /// True execution time (known-duration policies)
    Exact,
    /// Optimistic estimate
    LowerBound,
    /// Conservative estimate
    UpperBound,
}

/// Per-container metadata attached at activation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Epoch that owns this container (epoch-based policies)
    pub epoch: Option<u64>,
}

impl ContainerMetadata {
    pub fn for_epoch(epoch: u64) -> Self {
        ContainerMetadata { epoch: Some(epoch) }
    }
}

/// A unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub execution_time: Time,
    pub receival_time: Time,
    pub deadline: Option<Time>,
    pub completion_time: Option<Time>,
    pub lower_bound: Option<Time>,
    pub upper_bound: Option<Time>,
    pub epoch: Option<u64>,
}

impl Job {
    pub fn new(id: impl Into<JobId>, execution_time: Time, receival_time: Time) -> Self {
        Job {
            id: id.into(),
            execution_time,
            receival_time,
            deadline: None,
            completion_time: None,
            lower_bound: None,
            upper_bound: None,
            epoch: None,
        }
    }

    pub fn with_bounds(mut self, lower: Time, upper: Time) -> Self {
        self.lower_bound = Some(lower);
        self.upper_bound = Some(upper);
        self
    }

    pub fn with_deadline(mut self, deadline: Time) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    /// Execution time as seen by a planner using `estimate`.
    ///
    /// Jobs without bounds fall back to their true execution time.
    pub fn estimated_time(&self, estimate: DurationEstimate) -> Time {
        match estimate {
            DurationEstimate::Exact => self.execution_time,
            DurationEstimate::LowerBound => self.lower_bound.unwrap_or(self.execution_time),
            DurationEstimate::UpperBound => self.upper_bound.unwrap_or(self.execution_time),
        }
    }

    /// Record completion; called once by the container that ran the job
    pub fn complete(&mut self, time: Time) {
        debug_assert!(
            time >= self.receival_time,
            "job {} completed at {time} before it arrived at {}",
            self.id,
            self.receival_time
        );
        self.completion_time = Some(time);
    }

    pub fn is_completed(&self) -> bool {
        self.completion_time.is_some()
    }

    /// Completion minus arrival, once completed
    pub fn queue_time(&self) -> Option<Time> {
        self.completion_time.map(|done| done - self.receival_time)
    }

    /// Time spent waiting before execution began
    pub fn waiting_time(&self) -> Option<Time> {
        self.queue_time().map(|queue| queue - self.execution_time)
    }

    /// Arrival order: receival time, ties broken by id
    pub fn arrival_order(&self, other: &Job) -> Ordering {
        self.receival_time
            .cmp(&other.receival_time)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_queue_time() {
        let mut job = Job::new("j1", 5, 3);
        assert_eq!(job.queue_time(), None);
        assert!(!job.is_completed());

        job.complete(10);
        assert!(job.is_completed());
        assert_eq!(job.queue_time(), Some(7));
        assert_eq!(job.waiting_time(), Some(2));
    }

    #[test]
    fn test_estimated_time_falls_back_to_execution_time() {
        let bounded = Job::new("a", 5, 0).with_bounds(3, 8);
        assert_eq!(bounded.estimated_time(DurationEstimate::Exact), 5);
        assert_eq!(bounded.estimated_time(DurationEstimate::LowerBound), 3);
        assert_eq!(bounded.estimated_time(DurationEstimate::UpperBound), 8);

        let plain = Job::new("b", 5, 0);
        assert_eq!(plain.estimated_time(DurationEstimate::LowerBound), 5);
        assert_eq!(plain.estimated_time(DurationEstimate::UpperBound), 5);
    }

    #[test]
    fn test_arrival_order_breaks_ties_by_id() {
        let mut jobs = vec![
            Job::new("b", 1, 4),
            Job::new("c", 1, 2),
            Job::new("a", 1, 4),
        ];
        jobs.sort_by(Job::arrival_order);

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_container_id_display() {
        assert_eq!(ContainerId(7).to_string(), "c7");
        assert_eq!(ContainerMetadata::for_epoch(2).epoch, Some(2));
        assert_eq!(ContainerMetadata::default().epoch, None);
    }
}
