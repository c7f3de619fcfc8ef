//! Configuration of [`RolloutCoordinator`](super::RolloutCoordinator).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`RolloutCoordinator`](super::RolloutCoordinator).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct RolloutConfig {
    /// One in `pooling_rate` simulation steps is a decision step.
    pub pooling_rate: usize,

    /// Simulated time per step, in seconds.
    pub step_interval: f32,

    /// Speed-up of the simulation clock relative to the ticks passed in.
    pub time_scale: f32,

    /// Whether the agent explores and optimizes.
    pub is_training: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            pooling_rate: 5,
            step_interval: 0.02,
            time_scale: 1.0,
            is_training: true,
        }
    }
}

impl RolloutConfig {
    /// Sets the pooling rate.
    pub fn pooling_rate(mut self, v: usize) -> Self {
        self.pooling_rate = v;
        self
    }

    /// Sets the step interval in seconds.
    pub fn step_interval(mut self, v: f32) -> Self {
        self.step_interval = v;
        self
    }

    /// Sets the time scale.
    pub fn time_scale(mut self, v: f32) -> Self {
        self.time_scale = v;
        self
    }

    /// Sets training mode.
    pub fn is_training(mut self, v: bool) -> Self {
        self.is_training = v;
        self
    }

    /// Elapsed tick time that makes up one simulation step.
    pub fn effective_interval(&self) -> f32 {
        self.step_interval / self.time_scale
    }

    /// Constructs [`RolloutConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`RolloutConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
