//! Configuration of [`ReplayMemory`](super::ReplayMemory).
use super::WeightNormalizer;
use crate::error::LockstepError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of prioritized sampling.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PerConfig {
    /// Exponent of priorities. `0` gives uniform sampling.
    pub alpha: f32,

    /// Initial exponent of importance weights.
    pub beta_0: f32,

    /// Final exponent of importance weights.
    pub beta_final: f32,

    /// Number of priority updates after which `beta` reaches `beta_final`.
    pub n_opts_final: usize,

    /// Added to every priority written back so that no transition gets zero probability.
    pub eps: f32,

    /// Normalizer of importance weights.
    pub normalize: WeightNormalizer,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta_0: 0.4,
            beta_final: 1.0,
            n_opts_final: 500_000,
            eps: 1e-6,
            normalize: WeightNormalizer::Batch,
        }
    }
}

impl PerConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.alpha >= 0.0) {
            return Err(LockstepError::config(format!("PER alpha must be >= 0, got {}", self.alpha)).into());
        }
        if !(self.eps >= 0.0) {
            return Err(LockstepError::config(format!("PER eps must be >= 0, got {}", self.eps)).into());
        }
        Ok(())
    }

    /// Sets `alpha`.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets `beta_0`.
    pub fn beta_0(mut self, beta_0: f32) -> Self {
        self.beta_0 = beta_0;
        self
    }

    /// Sets `beta_final`.
    pub fn beta_final(mut self, beta_final: f32) -> Self {
        self.beta_final = beta_final;
        self
    }

    /// Sets `n_opts_final`.
    pub fn n_opts_final(mut self, n_opts_final: usize) -> Self {
        self.n_opts_final = n_opts_final;
        self
    }

    /// Sets `eps`.
    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Sets the normalizer of importance weights.
    pub fn normalize(mut self, normalize: WeightNormalizer) -> Self {
        self.normalize = normalize;
        self
    }
}

/// Configuration of [`ReplayMemory`](super::ReplayMemory).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayMemoryConfig {
    /// Maximum number of stored transitions.
    pub capacity: usize,

    /// Seed of the sampling RNG.
    pub seed: u64,

    /// Prioritized sampling, if any.
    pub per_config: Option<PerConfig>,
}

impl Default for ReplayMemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            seed: 42,
            per_config: None,
        }
    }
}

impl ReplayMemoryConfig {
    /// Sets the capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the seed of the sampling RNG.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enables or disables prioritized sampling.
    pub fn per_config(mut self, per_config: Option<PerConfig>) -> Self {
        self.per_config = per_config;
        self
    }

    /// Constructs [`ReplayMemoryConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ReplayMemoryConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
