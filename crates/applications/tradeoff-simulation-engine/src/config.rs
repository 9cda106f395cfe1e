//! Run configuration
//!
//! A run needs a job trace, a results path, a policy with its parameters, and
//! the container startup delay. Configs are read from JSON (`.json`) or from
//! the line-based format:
//!
//! ```text
//! jobs/mixed.txt
//! results/kjd1_mixed.txt
//! kjd1,0.5
//! 10
//! 100000        (optional step limit)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SimError};
use crate::types::Time;

/// Registry key plus its string parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl PolicySpec {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        PolicySpec {
            name: name.into(),
            params,
        }
    }

    /// Parse `name,param,param...`
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = text.split(',').map(str::trim);
        let name = fields
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SimError::config("policy line is empty"))?;
        let params = fields.map(str::to_string).collect();
        Ok(Self::new(name, params))
    }
}

/// Non-empty line `index` (0-based) of a line-based config
fn line_field<'a>(lines: &[&'a str], index: usize, what: &str) -> Result<&'a str> {
    match lines.get(index) {
        Some(line) if !line.is_empty() => Ok(*line),
        _ => Err(SimError::config(format!("line {}: missing {what}", index + 1))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub jobs_file: PathBuf,
    pub results_file: PathBuf,
    pub policy: PolicySpec,
    pub startup_time: Time,
    #[serde(default)]
    pub max_steps: Option<u64>,
}

impl RunConfig {
    pub fn new(
        jobs_file: impl Into<PathBuf>,
        results_file: impl Into<PathBuf>,
        policy: PolicySpec,
        startup_time: Time,
    ) -> Self {
        RunConfig {
            jobs_file: jobs_file.into(),
            results_file: results_file.into(),
            policy,
            startup_time,
            max_steps: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Load a config, choosing the format by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;

        let config = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&contents)?
        } else {
            Self::parse_lines(&contents)?
        };
        config.validate()?;

        debug!(path = %path.display(), policy = %config.policy.name, "Loaded run config");
        Ok(config)
    }

    /// Parse the line-based format
    pub fn parse_lines(contents: &str) -> Result<Self> {
        let lines: Vec<&str> = contents.lines().map(str::trim).collect();
        let lines: &[&str] = {
            let end = lines.iter().rposition(|l| !l.is_empty()).map_or(0, |i| i + 1);
            &lines[..end]
        };

        let jobs_file = line_field(lines, 0, "jobs file")?;
        let results_file = line_field(lines, 1, "results file")?;
        let policy = PolicySpec::parse(line_field(lines, 2, "policy")?)?;
        let startup_time: Time = line_field(lines, 3, "startup time")?.parse().map_err(|_| {
            SimError::config("line 4: startup time is not an integer")
        })?;

        let mut config = Self::new(jobs_file, results_file, policy, startup_time);
        if lines.len() > 4 {
            let max_steps = line_field(lines, 4, "step limit")?
                .parse()
                .map_err(|_| SimError::config("line 5: step limit is not an integer"))?;
            config.max_steps = Some(max_steps);
        }
        if lines.len() > 5 {
            return Err(SimError::config("unexpected lines after the step limit"));
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.startup_time < 0 {
            return Err(SimError::invalid_parameter(format!(
                "startup time must be non-negative, got {}",
                self.startup_time
            )));
        }
        if self.policy.name.trim().is_empty() {
            return Err(SimError::config("policy name is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_spec_parse() {
        let spec = PolicySpec::parse("kjd1, 0.5").unwrap();
        assert_eq!(spec, PolicySpec::new("kjd1", vec!["0.5".to_string()]));
        assert_eq!(PolicySpec::parse("fifo").unwrap().params.len(), 0);
        assert!(PolicySpec::parse("").is_err());
    }

    #[test]
    fn test_parse_lines() {
        let config = RunConfig::parse_lines("jobs.txt\nout.txt\nujd2,0.25\n3\n\n").unwrap();
        assert_eq!(config.jobs_file, PathBuf::from("jobs.txt"));
        assert_eq!(config.policy.name, "ujd2");
        assert_eq!(config.startup_time, 3);
        assert_eq!(config.max_steps, None);

        let config = RunConfig::parse_lines("jobs.txt\nout.txt\nfifo,2\n1\n500").unwrap();
        assert_eq!(config.max_steps, Some(500));
    }

    #[test]
    fn test_parse_lines_errors() {
        assert!(RunConfig::parse_lines("jobs.txt\nout.txt\nfifo").is_err());
        assert!(RunConfig::parse_lines("jobs.txt\nout.txt\nfifo\nsoon").is_err());
        assert!(RunConfig::parse_lines("jobs.txt\n\nfifo\n1").is_err());
        assert!(RunConfig::parse_lines("jobs.txt\nout.txt\nfifo\n1\nlots").is_err());
    }

    #[test]
    fn test_from_file_json_and_lines() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("run.json");
        let config = RunConfig::new("jobs.txt", "out.txt", PolicySpec::new("kjd2", vec!["0.5".into()]), 2)
            .with_max_steps(10);
        fs::write(&json_path, serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(RunConfig::from_file(&json_path).unwrap(), config);

        let text_path = dir.path().join("run.cfg");
        fs::write(&text_path, "jobs.txt\nout.txt\nkjd2,0.5\n2\n10\n").unwrap();
        assert_eq!(RunConfig::from_file(&text_path).unwrap(), config);

        fs::write(&text_path, "jobs.txt\nout.txt\nkjd2,0.5\n-2\n").unwrap();
        assert!(matches!(
            RunConfig::from_file(&text_path),
            Err(SimError::InvalidParameter(_))
        ));
    }
}
