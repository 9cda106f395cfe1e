//! Synthetic job traces
//!
//! A job-set description has one batch per line:
//!
//! ```text
//! <num_jobs>,<start_time>,<end_time>,<distribution>,<params...>
//! ```
//!
//! Arrivals are uniform integers in `[start_time, end_time]`. Execution times
//! are drawn from the named distribution, rounded, and clamped at zero:
//!
//! - `poisson` - `loc,mu`
//! - `exponential` - `loc,scale`
//! - `skew_normal` - `loc,scale,shape`

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Poisson, SkewNormal};

use crate::error::{Result, SimError};
use crate::types::{Job, Time};

/// Execution-time distribution of one batch
#[derive(Debug, Clone)]
pub enum ExecutionDistribution {
    Poisson { loc: f64, dist: Poisson<f64> },
    Exponential { loc: f64, dist: Exp<f64> },
    SkewNormal { dist: SkewNormal<f64> },
}

impl ExecutionDistribution {
    pub fn poisson(loc: f64, mu: f64) -> Result<Self> {
        let dist = Poisson::new(mu)
            .map_err(|e| SimError::invalid_parameter(format!("poisson mu {mu}: {e}")))?;
        Ok(Self::Poisson { loc, dist })
    }

    pub fn exponential(loc: f64, scale: f64) -> Result<Self> {
        if !(scale > 0.0) {
            return Err(SimError::invalid_parameter(format!(
                "exponential scale must be positive, got {scale}"
            )));
        }
        let dist = Exp::new(1.0 / scale)
            .map_err(|e| SimError::invalid_parameter(format!("exponential scale {scale}: {e}")))?;
        Ok(Self::Exponential { loc, dist })
    }

    pub fn skew_normal(loc: f64, scale: f64, shape: f64) -> Result<Self> {
        let dist = SkewNormal::new(loc, scale, shape)
            .map_err(|e| SimError::invalid_parameter(format!("skew_normal: {e}")))?;
        Ok(Self::SkewNormal { dist })
    }

    /// Build a distribution from its name and numeric parameters
    pub fn from_name(name: &str, params: &[f64]) -> Result<Self> {
        let arity = |n: usize| -> Result<()> {
            if params.len() == n {
                Ok(())
            } else {
                Err(SimError::invalid_parameter(format!(
                    "{name} takes {n} parameters, got {}",
                    params.len()
                )))
            }
        };

        match name.trim() {
            "poisson" => {
                arity(2)?;
                Self::poisson(params[0], params[1])
            }
            "exponential" => {
                arity(2)?;
                Self::exponential(params[0], params[1])
            }
            "skew_normal" => {
                arity(3)?;
                Self::skew_normal(params[0], params[1], params[2])
            }
            other => Err(SimError::invalid_parameter(format!(
                "unknown distribution '{other}'"
            ))),
        }
    }

    /// Draw one execution time
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Time {
        let value: f64 = match self {
            Self::Poisson { loc, dist } => loc + Distribution::<f64>::sample(dist, rng),
            Self::Exponential { loc, dist } => loc + dist.sample(rng),
            Self::SkewNormal { dist } => dist.sample(rng),
        };
        (value.round() as Time).max(0)
    }
}

/// One line of a job-set description
#[derive(Debug, Clone)]
pub struct JobBatchSpec {
    pub count: usize,
    pub start_time: Time,
    pub end_time: Time,
    pub distribution: ExecutionDistribution,
}

impl JobBatchSpec {
    /// Parse a description line; `line` is 1-based and only used in errors
    pub fn from_line(text: &str, line: usize) -> Result<Self> {
        let fields: Vec<&str> = text.split(',').map(str::trim).collect();
        if fields.len() < 4 {
            return Err(SimError::config(format!(
                "job set line {line}: expected <num_jobs>,<start>,<end>,<distribution>,<params...>"
            )));
        }

        let int = |field: &str, what: &str| -> Result<i64> {
            field.parse().map_err(|_| {
                SimError::config(format!("job set line {line}: {what} '{field}' is not an integer"))
            })
        };
        let count = usize::try_from(int(fields[0], "job count")?)
            .map_err(|_| SimError::config(format!("job set line {line}: negative job count")))?;
        let start_time = int(fields[1], "start time")?;
        let end_time = int(fields[2], "end time")?;
        if start_time < 0 || end_time < start_time {
            return Err(SimError::config(format!(
                "job set line {line}: arrival range [{start_time}, {end_time}] is invalid"
            )));
        }

        let params = fields[4..]
            .iter()
            .map(|field| {
                field.parse::<f64>().map_err(|_| {
                    SimError::config(format!("job set line {line}: parameter '{field}' is not a number"))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        Ok(JobBatchSpec {
            count,
            start_time,
            end_time,
            distribution: ExecutionDistribution::from_name(fields[3], &params)?,
        })
    }
}

/// Parse a job-set description, skipping blank lines
pub fn parse_job_set(contents: &str) -> Result<Vec<JobBatchSpec>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(index, text)| JobBatchSpec::from_line(text, index + 1))
        .collect()
}

pub fn read_job_set(path: impl AsRef<Path>) -> Result<Vec<JobBatchSpec>> {
    parse_job_set(&fs::read_to_string(path)?)
}

/// Seedable job generator
pub struct JobGenerator {
    rng: StdRng,
    prefix: String,
    next_id: u64,
    max_bound: Option<Time>,
}

impl JobGenerator {
    /// Create a generator; `None` seeds from the OS
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        JobGenerator {
            rng,
            prefix: String::new(),
            next_id: 1,
            max_bound: None,
        }
    }

    /// Prefix prepended to every generated id
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Attach bounds up to `max_bound` away from the true execution time
    pub fn with_max_bound(mut self, max_bound: Time) -> Self {
        self.max_bound = Some(max_bound.max(0));
        self
    }

    /// Generate one batch
    pub fn generate(&mut self, batch: &JobBatchSpec) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(batch.count);
        for _ in 0..batch.count {
            let execution = batch.distribution.sample(&mut self.rng);
            let receival = self.rng.gen_range(batch.start_time..=batch.end_time);
            let id = format!("{}{}", self.prefix, self.next_id);
            self.next_id += 1;

            let mut job = Job::new(id, execution, receival);
            if let Some(max_bound) = self.max_bound {
                let below = self.rng.gen_range(0..=max_bound);
                let above = self.rng.gen_range(0..=max_bound);
                job = job.with_bounds((execution - below).max(0), execution + above);
            }
            jobs.push(job);
        }
        jobs
    }

    /// Generate every batch, returning jobs in arrival order
    pub fn generate_all(&mut self, batches: &[JobBatchSpec]) -> Vec<Job> {
        let mut jobs: Vec<Job> = batches.iter().flat_map(|b| self.generate(b)).collect();
        jobs.sort_by(Job::arrival_order);
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_set() {
        let batches = parse_job_set("10,0,100,poisson,2,5\n\n3,5,5,skew_normal,10,2,1\n").unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].count, 10);
        assert_eq!(batches[1].start_time, 5);
        assert!(matches!(batches[1].distribution, ExecutionDistribution::SkewNormal { .. }));
    }

    #[test]
    fn test_parse_job_set_errors() {
        assert!(parse_job_set("10,0,100,uniform,1,2").is_err());
        assert!(parse_job_set("10,0,100,poisson,2").is_err());
        assert!(parse_job_set("10,50,10,poisson,2,5").is_err());
        assert!(parse_job_set("ten,0,10,poisson,2,5").is_err());
        assert!(parse_job_set("10,0,10").is_err());
        assert!(parse_job_set("10,0,10,exponential,0,0").is_err());
    }

    #[test]
    fn test_generation_is_reproducible() {
        let batches = parse_job_set("20,0,50,exponential,1,4").unwrap();
        let a = JobGenerator::new(Some(7)).generate_all(&batches);
        let b = JobGenerator::new(Some(7)).generate_all(&batches);
        assert_eq!(a, b);
    }

    #[test]
    fn test_generated_jobs_respect_ranges() {
        let batches = parse_job_set("50,10,20,poisson,3,2\n50,30,40,skew_normal,5,2,-3").unwrap();
        let jobs = JobGenerator::new(Some(1))
            .with_prefix("job")
            .with_max_bound(4)
            .generate_all(&batches);

        assert_eq!(jobs.len(), 100);
        for job in &jobs {
            assert!(job.id.as_str().starts_with("job"));
            assert!((10..=40).contains(&job.receival_time));
            assert!(job.execution_time >= 0);
            let (lower, upper) = (job.lower_bound.unwrap(), job.upper_bound.unwrap());
            assert!(lower <= job.execution_time && job.execution_time <= upper);
            assert!(upper - job.execution_time <= 4);
        }
        assert!(jobs.windows(2).all(|w| w[0].receival_time <= w[1].receival_time));
    }

    #[test]
    fn test_ids_count_across_batches() {
        let batches = parse_job_set("2,0,0,poisson,1,1\n2,0,0,poisson,1,1").unwrap();
        let mut generator = JobGenerator::new(Some(3));
        let mut ids: Vec<String> = batches
            .iter()
            .flat_map(|b| generator.generate(b))
            .map(|j| j.id.0)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
    }
}
