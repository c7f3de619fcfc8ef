//! Environment.
use super::{Act, Step};
use crate::error::LockstepError;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Shape of a state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateSize {
    /// A flat vector of the given length.
    Vector(usize),

    /// A single-channel grid of `(height, width)`, stored row-major.
    Grid(usize, usize),
}

impl StateSize {
    /// Number of scalars in a state.
    pub fn numel(&self) -> usize {
        match self {
            Self::Vector(n) => *n,
            Self::Grid(h, w) => h * w,
        }
    }
}

/// Static size descriptors of an environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvSizes {
    /// Shape of states.
    pub state_size: StateSize,

    /// Number of choices of each discrete head.
    pub action_sizes: Vec<usize>,

    /// `(min, max)` of each continuous head.
    pub continuous_bounds: Vec<(f32, f32)>,
}

impl EnvSizes {
    /// Sizes of an environment with discrete heads only.
    pub fn discrete(state_size: StateSize, action_sizes: Vec<usize>) -> Self {
        Self {
            state_size,
            action_sizes,
            continuous_bounds: vec![],
        }
    }

    /// Sets the bounds of the continuous heads.
    pub fn continuous_bounds(mut self, v: Vec<(f32, f32)>) -> Self {
        self.continuous_bounds = v;
        self
    }

    /// Number of continuous heads.
    pub fn n_continuous(&self) -> usize {
        self.continuous_bounds.len()
    }

    /// Checks that the descriptors can be used to build an agent.
    pub fn validate(&self) -> Result<()> {
        if self.state_size.numel() == 0 {
            return Err(LockstepError::config("state size must be positive").into());
        }
        if self.action_sizes.is_empty() && self.continuous_bounds.is_empty() {
            return Err(LockstepError::config("environment has no action heads").into());
        }
        if let Some(i) = self.action_sizes.iter().position(|&n| n == 0) {
            return Err(LockstepError::config(format!("discrete head {} has no actions", i)).into());
        }
        for (i, (lo, hi)) in self.continuous_bounds.iter().enumerate() {
            if !(lo < hi) {
                return Err(LockstepError::config(format!(
                    "continuous head {} has invalid bounds ({}, {})",
                    i, lo, hi
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// An environment driven by the rollout coordinator.
pub trait Env {
    /// Returns the static size descriptors.
    fn sizes(&self) -> EnvSizes;

    /// Starts a new episode and returns its first state.
    fn reset(&mut self) -> Result<Vec<f32>>;

    /// Applies an action.
    fn step(&mut self, act: &Act) -> Result<Step>;

    /// Advances the internal dynamics without a new decision.
    ///
    /// `held` is the last action applied by [`Env::step`], or `None` before the first
    /// decision of the run. Rewards accrued here are the environment's to account for,
    /// typically by folding them into the reward of the next real step.
    fn ghost_step(&mut self, held: Option<&Act>) -> Result<()>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate() {
        let sizes = EnvSizes::discrete(StateSize::Vector(4), vec![2]);
        assert!(sizes.validate().is_ok());

        let sizes = EnvSizes::discrete(StateSize::Grid(3, 0), vec![2]);
        let err = sizes.validate().unwrap_err();
        assert!(err.downcast_ref::<LockstepError>().unwrap().is_config());

        let sizes = EnvSizes::discrete(StateSize::Vector(4), vec![]);
        assert!(sizes.validate().is_err());

        let sizes = EnvSizes::discrete(StateSize::Vector(4), vec![])
            .continuous_bounds(vec![(1.0, -1.0)]);
        assert!(sizes.validate().is_err());
    }
}
