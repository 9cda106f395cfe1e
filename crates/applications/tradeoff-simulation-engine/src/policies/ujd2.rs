//! Unknown durations, sliding-window packing on upper bounds

use super::kjd2::SlidingWindowPolicy;
use super::{SchedulingPolicy, parse_epsilon};
use crate::action::Action;
use crate::error::Result;
use crate::system::SimulatedSystem;
use crate::types::{DurationEstimate, Job, Time};

/// KJD2's packer planning with each job's upper bound.
///
/// Real durations never exceed the bound, so the waiting-time guarantee of
/// the known-duration packer carries over at the price of looser packing.
pub struct Ujd2Policy(SlidingWindowPolicy);

impl Ujd2Policy {
    pub fn new(epsilon: f64) -> Self {
        Ujd2Policy(SlidingWindowPolicy::new("UJD2", epsilon, DurationEstimate::UpperBound))
    }

    /// Parameters: `[epsilon]`
    pub fn from_params(params: &[String]) -> Result<Self> {
        Ok(Self::new(parse_epsilon(params, "ujd2")?))
    }

    pub fn max_delay(&self, startup_time: Time) -> Time {
        self.0.max_delay(startup_time)
    }
}

impl SchedulingPolicy for Ujd2Policy {
    fn determine_actions(&mut self, system: &SimulatedSystem, pending_jobs: &[Job]) -> Vec<Action> {
        self.0.determine_actions(system, pending_jobs)
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::activation_count;

    #[test]
    fn test_packs_on_upper_bounds() {
        let mut policy = Ujd2Policy::new(0.5);
        let mut system = SimulatedSystem::new(2);
        system.run(3).unwrap();

        // True durations would fit together; upper bounds do not
        let jobs = [
            Job::new("a", 1, 0).with_bounds(1, 4),
            Job::new("b", 1, 0).with_bounds(1, 4),
        ];
        let actions = policy.determine_actions(&system, &jobs);
        assert_eq!(activation_count(&actions), 2);

        let mut exact = super::super::Kjd2Policy::new(0.5);
        assert_eq!(activation_count(&exact.determine_actions(&system, &jobs)), 1);
    }

    #[test]
    fn test_name_and_delay() {
        let policy = Ujd2Policy::from_params(&["0.5".to_string()]).unwrap();
        assert_eq!(policy.name(), "UJD2");
        assert_eq!(policy.max_delay(2), 6);
    }
}
