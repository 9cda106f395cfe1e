//! Error types for the simulation engine

use thiserror::Error;

use crate::types::{ContainerId, JobId, Time};

/// Simulation result type
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors that can occur while configuring or running a simulation
#[derive(Error, Debug)]
pub enum SimError {
    /// Run configuration is incomplete or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// No policy is registered under the requested name
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    /// A policy or generator parameter failed validation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A job trace line could not be parsed
    #[error("Malformed trace at line {line}: {reason}")]
    MalformedTrace { line: usize, reason: String },

    /// The controller was asked to step without a scheduling policy
    #[error("No scheduling policy configured")]
    NoPolicy,

    /// An action referenced a container that is not live
    #[error("Container {0} is not live")]
    UnknownContainer(ContainerId),

    /// An action referenced a job that is not queued on the container
    #[error("Job {job} is not queued on container {container}")]
    JobNotQueued { container: ContainerId, job: JobId },

    /// A reorder did not name exactly the jobs already queued
    #[error("Reorder for container {0} is not a permutation of its queue")]
    InvalidReorder(ContainerId),

    /// A container or the system was asked to run backward in time
    #[error("Cannot run {subject} backward from t={clock} to t={requested}")]
    TimeReversal {
        subject: String,
        clock: Time,
        requested: Time,
    },

    /// A policy requested a wake-up earlier than the current time
    #[error("Wait requested for t={requested}, which is before t={now}")]
    WaitInPast { requested: Time, now: Time },

    /// A container was terminated while it still held unfinished jobs
    #[error("Container {container} terminated with {jobs} unfinished jobs")]
    TerminateWithPendingWork { container: ContainerId, jobs: usize },

    /// The event loop stopped advancing
    #[error("No scheduling progress at t={time} with {pending} pending jobs")]
    NoProgress { time: Time, pending: usize },

    /// The watchdog step budget ran out
    #[error("Step limit of {0} exceeded")]
    StepLimitExceeded(u64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a trace parsing error for a 1-based line number
    pub fn malformed_trace(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedTrace {
            line,
            reason: reason.into(),
        }
    }

    /// Whether this error means a policy broke the action protocol
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownContainer(_)
                | Self::JobNotQueued { .. }
                | Self::InvalidReorder(_)
                | Self::TimeReversal { .. }
                | Self::WaitInPast { .. }
                | Self::TerminateWithPendingWork { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_classification() {
        assert!(SimError::UnknownContainer(ContainerId(3)).is_protocol_violation());
        assert!(SimError::WaitInPast { requested: 1, now: 2 }.is_protocol_violation());
        assert!(!SimError::NoPolicy.is_protocol_violation());
        assert!(!SimError::config("missing startup time").is_protocol_violation());
    }

    #[test]
    fn test_error_messages() {
        let err = SimError::malformed_trace(4, "expected integer");
        assert_eq!(err.to_string(), "Malformed trace at line 4: expected integer");

        let err = SimError::TimeReversal {
            subject: "container c2".to_string(),
            clock: 10,
            requested: 7,
        };
        assert_eq!(
            err.to_string(),
            "Cannot run container c2 backward from t=10 to t=7"
        );
    }
}
