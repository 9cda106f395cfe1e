//! Run reports and results files
//!
//! A results file holds the bare total cost on its first line, then one
//! `<job id>,<queue time>` line per job. Jobs that never completed are
//! written with a queue time of -1. Older files with a `cost:` prefix on
//! the first line are still read.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::types::{Job, JobId, Time};

/// Per-job result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub id: JobId,
    pub receival_time: Time,
    pub execution_time: Time,
    pub completion_time: Option<Time>,
}

impl JobOutcome {
    pub fn queue_time(&self) -> Option<Time> {
        self.completion_time.map(|done| done - self.receival_time)
    }

    pub fn waiting_time(&self) -> Option<Time> {
        self.queue_time().map(|queue| queue - self.execution_time)
    }
}

impl From<&Job> for JobOutcome {
    fn from(job: &Job) -> Self {
        JobOutcome {
            id: job.id.clone(),
            receival_time: job.receival_time,
            execution_time: job.execution_time,
            completion_time: job.completion_time,
        }
    }
}

/// Result of a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub policy_name: String,
    pub total_cost: Time,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub containers_launched: usize,
    pub steps: u64,
    pub max_queue_time: Time,
    pub average_queue_time: f64,
    pub p99_queue_time: Time,
    pub average_waiting_time: f64,
    pub outcomes: Vec<JobOutcome>,
}

impl SimulationReport {
    /// Summarize per-job outcomes, which should be in arrival order
    pub fn new(
        policy_name: impl Into<String>,
        total_cost: Time,
        containers_launched: usize,
        steps: u64,
        outcomes: Vec<JobOutcome>,
    ) -> Self {
        let mut queue_times: Vec<Time> = outcomes.iter().filter_map(JobOutcome::queue_time).collect();
        queue_times.sort_unstable();
        let waiting_times: Vec<Time> = outcomes.iter().filter_map(JobOutcome::waiting_time).collect();

        let mean = |values: &[Time]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<Time>() as f64 / values.len() as f64
            }
        };

        let p99_queue_time = if !queue_times.is_empty() {
            let idx = ((queue_times.len() as f64 * 0.99) as usize).min(queue_times.len() - 1);
            queue_times[idx]
        } else {
            0
        };

        SimulationReport {
            policy_name: policy_name.into(),
            total_cost,
            total_jobs: outcomes.len(),
            completed_jobs: queue_times.len(),
            containers_launched,
            steps,
            max_queue_time: queue_times.last().copied().unwrap_or(0),
            average_queue_time: mean(&queue_times),
            p99_queue_time,
            average_waiting_time: mean(&waiting_times),
            outcomes,
        }
    }

    pub fn all_completed(&self) -> bool {
        self.completed_jobs == self.total_jobs
    }

    /// `(id, queue time)` rows for the results file
    pub fn queue_times(&self) -> Vec<(JobId, Option<Time>)> {
        self.outcomes
            .iter()
            .map(|o| (o.id.clone(), o.queue_time()))
            .collect()
    }
}

/// Render a report in the results file format
pub fn format_results(report: &SimulationReport) -> String {
    let mut out = format!("{}\n", report.total_cost);
    for (id, queue) in report.queue_times() {
        out.push_str(&format!("{id},{}\n", queue.unwrap_or(-1)));
    }
    out
}

pub fn write_results(path: impl AsRef<Path>, report: &SimulationReport) -> Result<()> {
    fs::write(path, format_results(report))?;
    Ok(())
}

/// Results read back from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsFile {
    pub cost: Time,
    pub queue_times: Vec<(JobId, Option<Time>)>,
}

pub fn parse_results(contents: &str) -> Result<ResultsFile> {
    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| SimError::config("results file is empty"))?;
    let header = header.trim();
    let cost = header
        .strip_prefix("cost:")
        .unwrap_or(header)
        .trim()
        .parse::<Time>()
        .map_err(|_| SimError::config(format!("bad results header '{header}'")))?;

    let mut queue_times = Vec::new();
    for line in lines {
        let (id, queue) = line
            .rsplit_once(',')
            .ok_or_else(|| SimError::config(format!("bad results line '{line}'")))?;
        let queue: Time = queue
            .trim()
            .parse()
            .map_err(|_| SimError::config(format!("bad queue time in '{line}'")))?;
        let queue = if queue < 0 { None } else { Some(queue) };
        queue_times.push((JobId::new(id.trim()), queue));
    }

    Ok(ResultsFile { cost, queue_times })
}

pub fn read_results(path: impl AsRef<Path>) -> Result<ResultsFile> {
    parse_results(&fs::read_to_string(path)?)
}
