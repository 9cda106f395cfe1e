//! Adapter for a pretrained container-count model
//!
//! The model sees a fixed 20-feature summary of the system and the queue and
//! answers with a value in [-1, 1], rescaled to a target container count.
//! The adapter turns that target into terminations of idle containers,
//! activations of new ones, and least-loaded job placement.
//!
//! Training lives outside this crate. The bundled [`LinearTargetModel`] reads
//! exported weights from JSON.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::assign::LeastLoadedPlanner;
use super::{SchedulingPolicy, sorted_by_arrival};
use crate::action::Action;
use crate::error::{Result, SimError};
use crate::system::SimulatedSystem;
use crate::types::{ContainerMetadata, DurationEstimate, Job};

/// Number of observation features
pub const OBSERVATION_LEN: usize = 20;

/// Model input, feature by feature:
///
/// | idx | feature |
/// |-----|---------|
/// | 0 | live containers |
/// | 1 | queued jobs |
/// | 2-4 | min/mean/max container completion time, upper bounds |
/// | 5-7 | min/mean/max container completion time, lower bounds |
/// | 8-10 | min/mean/max queued receival time |
/// | 11-13 | total/min/max queued execution time, upper bounds |
/// | 14-16 | total/min/max queued execution time, lower bounds |
/// | 17-18 | oldest queued job execution time, upper/lower bound |
/// | 19 | startup delay |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation(pub [f64; OBSERVATION_LEN]);

fn min_max(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

/// Writes min, mean, max of `values` at `offset`; leaves zeros when empty
fn summarize(features: &mut [f64; OBSERVATION_LEN], offset: usize, values: &[f64]) {
    if values.is_empty() {
        return;
    }
    let (min, max) = min_max(values);
    features[offset] = min;
    features[offset + 1] = values.iter().sum::<f64>() / values.len() as f64;
    features[offset + 2] = max;
}

/// Writes total, min, max of `values` at `offset`; leaves zeros when empty
fn volume_summary(features: &mut [f64; OBSERVATION_LEN], offset: usize, values: &[f64]) {
    if values.is_empty() {
        return;
    }
    let (min, max) = min_max(values);
    features[offset] = values.iter().sum();
    features[offset + 1] = min;
    features[offset + 2] = max;
}

impl Observation {
    pub fn capture(system: &SimulatedSystem, pending_jobs: &[Job]) -> Self {
        let mut features = [0.0; OBSERVATION_LEN];
        let queue = sorted_by_arrival(pending_jobs);

        features[0] = system.container_count() as f64;
        features[1] = queue.len() as f64;

        for (offset, estimate) in [(2, DurationEstimate::UpperBound), (5, DurationEstimate::LowerBound)] {
            let completion: Vec<f64> = system
                .containers()
                .map(|c| c.time_until_done_using(estimate) as f64)
                .collect();
            summarize(&mut features, offset, &completion);
        }

        let receivals: Vec<f64> = queue.iter().map(|j| j.receival_time as f64).collect();
        summarize(&mut features, 8, &receivals);

        for (offset, estimate) in [(11, DurationEstimate::UpperBound), (14, DurationEstimate::LowerBound)] {
            let sizes: Vec<f64> = queue.iter().map(|j| j.estimated_time(estimate) as f64).collect();
            volume_summary(&mut features, offset, &sizes);
        }

        if let Some(oldest) = queue.first() {
            features[17] = oldest.estimated_time(DurationEstimate::UpperBound) as f64;
            features[18] = oldest.estimated_time(DurationEstimate::LowerBound) as f64;
        }
        features[19] = system.startup_time() as f64;

        Observation(features)
    }
}

/// Anything that maps an observation to a raw action in [-1, 1]
pub trait TargetModel: Send {
    fn predict(&self, observation: &Observation) -> f64;
}

/// `tanh(w · x + b)` over the observation features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTargetModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearTargetModel {
    pub fn new(weights: Vec<f64>, bias: f64) -> Result<Self> {
        if weights.len() != OBSERVATION_LEN {
            return Err(SimError::invalid_parameter(format!(
                "rl: model needs {OBSERVATION_LEN} weights, got {}",
                weights.len()
            )));
        }
        Ok(LinearTargetModel { weights, bias })
    }

    /// Load weights exported as `{"weights": [...], "bias": ...}`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let model: LinearTargetModel = serde_json::from_str(&raw)?;
        Self::new(model.weights, model.bias)
    }
}

impl TargetModel for LinearTargetModel {
    fn predict(&self, observation: &Observation) -> f64 {
        let dot: f64 = self
            .weights
            .iter()
            .zip(observation.0.iter())
            .map(|(w, x)| w * x)
            .sum();
        (dot + self.bias).tanh()
    }
}

/// Map a raw action in [-1, 1] onto `0..=max_containers`
pub fn rescale_action(action: f64, max_containers: usize) -> usize {
    let action = if action.is_finite() { action.clamp(-1.0, 1.0) } else { -1.0 };
    ((action + 1.0) * max_containers as f64 / 2.0).floor() as usize
}

pub struct RlPolicy {
    model: Box<dyn TargetModel>,
    max_containers: usize,
}

impl RlPolicy {
    pub fn new(model: Box<dyn TargetModel>, max_containers: usize) -> Self {
        RlPolicy {
            model,
            max_containers,
        }
    }

    /// Parameters: `[model_path, max_containers]`
    pub fn from_params(params: &[String]) -> Result<Self> {
        let [path, max, ..] = params else {
            return Err(SimError::invalid_parameter(
                "rl expects a model path and a maximum container count",
            ));
        };
        let max_containers: usize = max.trim().parse().map_err(|_| {
            SimError::invalid_parameter(format!("rl: max containers '{max}' is not an integer"))
        })?;
        if max_containers == 0 {
            return Err(SimError::invalid_parameter("rl: max containers must be at least 1"));
        }

        let model = LinearTargetModel::from_file(path.trim())?;
        Ok(Self::new(Box::new(model), max_containers))
    }

    /// Container count the model asks for, at least one while jobs wait
    pub fn target(&self, observation: &Observation, pending: usize) -> usize {
        let target = rescale_action(self.model.predict(observation), self.max_containers);
        if pending > 0 && target == 0 {
            warn!(pending, "Model asked for zero containers with jobs queued, keeping one");
            return 1;
        }
        target
    }
}

impl SchedulingPolicy for RlPolicy {
    fn determine_actions(&mut self, system: &SimulatedSystem, pending_jobs: &[Job]) -> Vec<Action> {
        let observation = Observation::capture(system, pending_jobs);
        let target = self.target(&observation, pending_jobs.len());

        let mut actions = Vec::new();
        let mut terminated = HashSet::new();
        for container in system.containers() {
            if system.container_count() - terminated.len() <= target {
                break;
            }
            if container.is_done() {
                terminated.insert(container.id());
                actions.push(Action::terminate(container.id()));
            }
        }

        let mut planner = LeastLoadedPlanner::new(DurationEstimate::Exact);
        for container in system.containers() {
            if !terminated.contains(&container.id()) {
                planner.add_existing(container);
            }
        }
        let live = system.container_count() - terminated.len();
        for _ in live..target {
            planner.add_new(system.startup_time());
        }

        for job in sorted_by_arrival(pending_jobs) {
            planner.assign(job);
        }

        let next = planner.next_completion();
        actions.extend(planner.into_actions(ContainerMetadata::default(), true));
        if let Some(delay) = next {
            actions.push(Action::Wait(system.time() + delay));
        }
        actions
    }

    fn name(&self) -> &str {
        "RL"
    }
}
