//! Configuration of PPO agent.
use super::{actor::ActorConfig, critic::CriticConfig};
use crate::{
    mlp::{Activation, MlpConfig},
    opt::{CyclicLrConfig, OptimizerConfig},
    Device,
};
use anyhow::Result;
use lockstep_core::{error::LockstepError, EnvSizes};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Ppo`](super::Ppo) agent.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PpoConfig {
    /// Number of finished episodes collected before an optimization.
    pub batch_size: usize,

    /// Number of transitions per minibatch. Recurrent agents use one episode
    /// per minibatch instead.
    pub minibatch_size: usize,

    /// Number of buffered transitions that triggers an optimization even if fewer
    /// than `batch_size` episodes have finished.
    pub memory_size: usize,

    /// Discount factor.
    pub discount_factor: f64,

    /// Lambda of generalized advantage estimation.
    pub gae_lambda: f64,

    /// Clipping range of the probability ratio.
    pub clip_eps: f64,

    /// Clipping range of the value estimate around its old value.
    pub value_clip_range: Option<f64>,

    /// Coefficient of the value loss.
    pub value_coef: f64,

    /// Coefficient of the entropy bonus.
    pub entropy_coef: f64,

    /// Passes over the rollout buffer per optimization.
    pub epochs: usize,

    /// Units of each hidden layer.
    pub width: usize,

    /// Number of hidden layers.
    pub depth: usize,

    /// Insert an LSTM in the actor.
    pub recurrent: bool,

    /// Bounds of the log standard deviation of continuous heads.
    pub log_std_range: (f64, f64),

    /// Optimizer of the actor and of the critic.
    pub opt_config: OptimizerConfig,

    /// Learning rate scheduler of both optimizers.
    pub lr_scheduler: Option<CyclicLrConfig>,

    /// Maximum gradient norm, applied to the actor and the critic independently.
    pub max_grad_norm: Option<f64>,

    /// Seed of action sampling and minibatch shuffling.
    pub seed: u64,

    /// Device.
    pub device: Device,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            minibatch_size: 256,
            memory_size: 10000,
            discount_factor: 0.99,
            gae_lambda: 0.95,
            clip_eps: 0.2,
            value_clip_range: Some(0.2),
            value_coef: 0.5,
            entropy_coef: 0.005,
            epochs: 3,
            width: 128,
            depth: 2,
            recurrent: false,
            log_std_range: (-5.0, 2.0),
            opt_config: OptimizerConfig::Adam {
                lr: 3e-4,
                amsgrad: true,
            },
            lr_scheduler: Some(CyclicLrConfig::default()),
            max_grad_norm: Some(0.5),
            seed: 42,
            device: Device::Cpu,
        }
    }
}

impl PpoConfig {
    /// Sets the number of episodes per optimization.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the minibatch size.
    pub fn minibatch_size(mut self, v: usize) -> Self {
        self.minibatch_size = v;
        self
    }

    /// Sets the capacity of the rollout buffer.
    pub fn memory_size(mut self, v: usize) -> Self {
        self.memory_size = v;
        self
    }

    /// Sets the discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.discount_factor = v;
        self
    }

    /// Sets lambda of GAE.
    pub fn gae_lambda(mut self, v: f64) -> Self {
        self.gae_lambda = v;
        self
    }

    /// Sets the clipping range of the probability ratio.
    pub fn clip_eps(mut self, v: f64) -> Self {
        self.clip_eps = v;
        self
    }

    /// Sets the clipping range of value estimates.
    pub fn value_clip_range(mut self, v: Option<f64>) -> Self {
        self.value_clip_range = v;
        self
    }

    /// Sets the coefficient of the value loss.
    pub fn value_coef(mut self, v: f64) -> Self {
        self.value_coef = v;
        self
    }

    /// Sets the coefficient of the entropy bonus.
    pub fn entropy_coef(mut self, v: f64) -> Self {
        self.entropy_coef = v;
        self
    }

    /// Sets the number of epochs per optimization.
    pub fn epochs(mut self, v: usize) -> Self {
        self.epochs = v;
        self
    }

    /// Sets the width of hidden layers.
    pub fn width(mut self, v: usize) -> Self {
        self.width = v;
        self
    }

    /// Sets the number of hidden layers.
    pub fn depth(mut self, v: usize) -> Self {
        self.depth = v;
        self
    }

    /// Sets the recurrent flag.
    pub fn recurrent(mut self, v: bool) -> Self {
        self.recurrent = v;
        self
    }

    /// Sets the bounds of the log standard deviation.
    pub fn log_std_range(mut self, min: f64, max: f64) -> Self {
        self.log_std_range = (min, max);
        self
    }

    /// Sets the optimizer.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets the learning rate of the optimizers.
    pub fn learning_rate(mut self, v: f64) -> Self {
        self.opt_config = self.opt_config.learning_rate(v);
        self
    }

    /// Sets the learning rate scheduler.
    pub fn lr_scheduler(mut self, v: Option<CyclicLrConfig>) -> Self {
        self.lr_scheduler = v;
        self
    }

    /// Sets the maximum gradient norm.
    pub fn max_grad_norm(mut self, v: Option<f64>) -> Self {
        self.max_grad_norm = v;
        self
    }

    /// Sets the seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = v;
        self
    }

    /// Configuration of the actor for an environment with the given sizes.
    pub fn actor_config(&self, sizes: &EnvSizes) -> ActorConfig {
        ActorConfig {
            mlp: MlpConfig::new(sizes.state_size, self.width, self.depth, Activation::Tanh)
                .recurrent(self.recurrent),
            action_sizes: sizes.action_sizes.clone(),
            n_continuous: sizes.n_continuous(),
            log_std_range: self.log_std_range,
        }
    }

    /// Configuration of the critic for an environment with the given sizes.
    pub fn critic_config(&self, sizes: &EnvSizes) -> CriticConfig {
        CriticConfig {
            mlp: MlpConfig::new(sizes.state_size, self.width, self.depth, Activation::Tanh),
        }
    }

    pub(super) fn validate(&self, sizes: &EnvSizes) -> Result<()> {
        sizes.validate()?;
        let err = |msg: &str| -> Result<()> { Err(LockstepError::config(msg).into()) };
        if self.batch_size == 0 || self.minibatch_size == 0 || self.epochs == 0 {
            return err("batch size, minibatch size and epochs must be positive");
        }
        if self.memory_size == 0 {
            return err("memory size must be positive");
        }
        if !(0.0..=1.0).contains(&self.discount_factor) || !(0.0..=1.0).contains(&self.gae_lambda)
        {
            return err("discount factor and GAE lambda must be in [0, 1]");
        }
        if self.clip_eps <= 0.0 {
            return err("clipping range must be positive");
        }
        if !(self.log_std_range.0 < self.log_std_range.1) {
            return err("invalid range of log standard deviation");
        }
        Ok(())
    }

    /// Constructs [`PpoConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`PpoConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use lockstep_core::StateSize;
    use tempdir::TempDir;

    #[test]
    fn test_serde_ppo_config() -> Result<()> {
        let config = PpoConfig::default()
            .batch_size(4)
            .recurrent(true)
            .value_clip_range(None)
            .learning_rate(1e-3);

        let dir = TempDir::new("ppo_config")?;
        let path = dir.path().join("ppo_config.yaml");
        config.save(&path)?;
        let config_ = PpoConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }

    #[test]
    fn test_validate() {
        let sizes = EnvSizes::discrete(StateSize::Vector(2), vec![3]);
        assert!(PpoConfig::default().validate(&sizes).is_ok());

        let err = PpoConfig::default().epochs(0).validate(&sizes).unwrap_err();
        assert!(err.downcast_ref::<LockstepError>().unwrap().is_config());

        let err = PpoConfig::default()
            .log_std_range(1.0, -1.0)
            .validate(&sizes)
            .unwrap_err();
        assert!(err.downcast_ref::<LockstepError>().unwrap().is_config());
    }
}
