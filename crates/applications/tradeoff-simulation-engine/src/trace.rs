//! Job trace files
//!
//! One job per line: `id,receival,execution` followed by optional `key,value`
//! pairs. Keys: `1` lower bound, `2` upper bound, `3` deadline.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, SimError};
use crate::types::{Job, JobId, Time};

const LOWER_BOUND_KEY: &str = "1";
const UPPER_BOUND_KEY: &str = "2";
const DEADLINE_KEY: &str = "3";

/// Check that an id survives a write and read unchanged
///
/// Fields are comma-separated and trimmed, one job per line, so ids may not
/// be empty, contain commas or line breaks, or carry surrounding whitespace.
pub fn validate_id(id: &JobId) -> Result<()> {
    let text = id.as_str();
    let reason = if text.is_empty() {
        "is empty"
    } else if text.contains(',') {
        "contains a comma"
    } else if text.contains(['\n', '\r']) {
        "contains a line break"
    } else if text.trim() != text {
        "has surrounding whitespace"
    } else {
        return Ok(());
    };
    Err(SimError::invalid_parameter(format!("job id {text:?} {reason}")))
}

/// Render one job as a trace line
pub fn job_to_line(job: &Job) -> Result<String> {
    validate_id(&job.id)?;
    let mut line = format!("{},{},{}", job.id, job.receival_time, job.execution_time);
    if let Some(lower) = job.lower_bound {
        line.push_str(&format!(",{LOWER_BOUND_KEY},{lower}"));
    }
    if let Some(upper) = job.upper_bound {
        line.push_str(&format!(",{UPPER_BOUND_KEY},{upper}"));
    }
    if let Some(deadline) = job.deadline {
        line.push_str(&format!(",{DEADLINE_KEY},{deadline}"));
    }
    Ok(line)
}

fn parse_time(field: &str, what: &str, line: usize) -> Result<Time> {
    let value: Time = field
        .trim()
        .parse()
        .map_err(|_| SimError::malformed_trace(line, format!("{what} '{}' is not an integer", field.trim())))?;
    if value < 0 {
        return Err(SimError::malformed_trace(line, format!("{what} {value} is negative")));
    }
    Ok(value)
}

/// Parse one trace line; `line` is 1-based and only used in errors
pub fn job_from_line(text: &str, line: usize) -> Result<Job> {
    let fields: Vec<&str> = text.split(',').collect();
    if fields.len() < 3 {
        return Err(SimError::malformed_trace(line, "expected id,receival,execution"));
    }
    if fields.len() % 2 == 0 {
        return Err(SimError::malformed_trace(line, "dangling key without a value"));
    }

    let id = fields[0].trim();
    if id.is_empty() {
        return Err(SimError::malformed_trace(line, "empty job id"));
    }
    let receival = parse_time(fields[1], "receival time", line)?;
    let execution = parse_time(fields[2], "execution time", line)?;
    let mut job = Job::new(id, execution, receival);

    for pair in fields[3..].chunks(2) {
        let value = parse_time(pair[1], "value", line)?;
        match pair[0].trim() {
            LOWER_BOUND_KEY => job.lower_bound = Some(value),
            UPPER_BOUND_KEY => job.upper_bound = Some(value),
            DEADLINE_KEY => job.deadline = Some(value),
            other => {
                return Err(SimError::malformed_trace(line, format!("unknown key '{other}'")));
            }
        }
    }

    if job.lower_bound.is_some_and(|lower| lower > execution) {
        return Err(SimError::malformed_trace(line, "lower bound exceeds execution time"));
    }
    if job.upper_bound.is_some_and(|upper| upper < execution) {
        return Err(SimError::malformed_trace(line, "upper bound is below execution time"));
    }
    Ok(job)
}

/// Parse a whole trace; blank lines are skipped and ids must be unique
pub fn parse_trace(contents: &str) -> Result<Vec<Job>> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::new();

    for (index, text) in contents.lines().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        let job = job_from_line(text, index + 1)?;
        if !seen.insert(job.id.clone()) {
            return Err(SimError::malformed_trace(index + 1, format!("duplicate job id {}", job.id)));
        }
        jobs.push(job);
    }
    Ok(jobs)
}

/// Render a whole trace, failing before any output on an unwritable id
pub fn format_trace(jobs: &[Job]) -> Result<String> {
    let mut out = String::new();
    for job in jobs {
        out.push_str(&job_to_line(job)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn read_trace(path: impl AsRef<Path>) -> Result<Vec<Job>> {
    let path = path.as_ref();
    let jobs = parse_trace(&fs::read_to_string(path)?)?;
    debug!(path = %path.display(), jobs = jobs.len(), "Loaded job trace");
    Ok(jobs)
}

pub fn write_trace(path: impl AsRef<Path>, jobs: &[Job]) -> Result<()> {
    fs::write(path, format_trace(jobs)?)?;
    Ok(())
}
