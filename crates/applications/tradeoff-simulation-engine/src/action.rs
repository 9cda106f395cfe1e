//! Commands a scheduling policy hands back to the controller

use crate::types::{ContainerId, ContainerMetadata, Job, JobId, Time};

/// A single command produced by a policy.
///
/// Actions are applied to the system in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start a new container at the current time with an initial queue
    ActivateContainer {
        jobs: Vec<Job>,
        metadata: ContainerMetadata,
    },
    /// Stop a container and bank its alive time
    TerminateContainer(ContainerId),
    /// Append jobs to a container's queue
    AddJobs { container: ContainerId, jobs: Vec<Job> },
    /// Pull queued jobs back out of a container
    RemoveJobs {
        container: ContainerId,
        jobs: Vec<JobId>,
    },
    /// Replace a container's queue order
    ReorderJobs {
        container: ContainerId,
        order: Vec<JobId>,
    },
    /// Ask to be consulted again at this time even without new arrivals
    Wait(Time),
}

impl Action {
    pub fn activate(jobs: Vec<Job>) -> Self {
        Action::ActivateContainer {
            jobs,
            metadata: ContainerMetadata::default(),
        }
    }

    pub fn activate_with(jobs: Vec<Job>, metadata: ContainerMetadata) -> Self {
        Action::ActivateContainer { jobs, metadata }
    }

    pub fn add_jobs(container: ContainerId, jobs: Vec<Job>) -> Self {
        Action::AddJobs { container, jobs }
    }

    pub fn terminate(container: ContainerId) -> Self {
        Action::TerminateContainer(container)
    }

    /// Container this action targets, if any
    pub fn container(&self) -> Option<ContainerId> {
        match self {
            Action::TerminateContainer(id)
            | Action::AddJobs { container: id, .. }
            | Action::RemoveJobs { container: id, .. }
            | Action::ReorderJobs { container: id, .. } => Some(*id),
            Action::ActivateContainer { .. } | Action::Wait(_) => None,
        }
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Action::ActivateContainer { .. } => "activate",
            Action::TerminateContainer(_) => "terminate",
            Action::AddJobs { .. } => "add_jobs",
            Action::RemoveJobs { .. } => "remove_jobs",
            Action::ReorderJobs { .. } => "reorder_jobs",
            Action::Wait(_) => "wait",
        }
    }
}

/// The wake-up time requested by an action list.
///
/// When a policy emits several `Wait`s the last one wins.
pub fn requested_wait(actions: &[Action]) -> Option<Time> {
    actions.iter().rev().find_map(|action| match action {
        Action::Wait(time) => Some(*time),
        _ => None,
    })
}

/// Count of container activations in an action list
pub fn activation_count(actions: &[Action]) -> usize {
    actions
        .iter()
        .filter(|a| matches!(a, Action::ActivateContainer { .. }))
        .count()
}
