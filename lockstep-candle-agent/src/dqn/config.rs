//! Configuration of DQN agent.
use super::{explorer::EpsilonSchedule, qnet::QNetConfig};
use crate::{
    mlp::{Activation, MlpConfig},
    opt::{CyclicLrConfig, OptimizerConfig},
    util::CriticLoss,
    Device,
};
use anyhow::Result;
use lockstep_core::{
    error::LockstepError,
    replay_memory::{PerConfig, ReplayMemoryConfig},
    EnvSizes,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Dqn`](super::Dqn) agent.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct DqnConfig {
    /// Number of transitions per optimization step.
    pub batch_size: usize,

    /// Discount factor.
    pub discount_factor: f64,

    /// Units of each hidden layer.
    pub width: usize,

    /// Number of hidden layers.
    pub depth: usize,

    /// Activation of hidden layers.
    pub activation: Activation,

    /// Optimizer.
    pub opt_config: OptimizerConfig,

    /// Learning rate scheduler, stepped after every optimizer step.
    pub lr_scheduler: Option<CyclicLrConfig>,

    /// Maximum L2 norm of the gradient.
    pub max_grad_norm: Option<f64>,

    /// Epsilon of epsilon-greedy selection.
    pub epsilon: EpsilonSchedule,

    /// Learn value distributions instead of expected values.
    pub categorical: bool,

    /// Lower end of the value support.
    pub v_min: f32,

    /// Upper end of the value support.
    pub v_max: f32,

    /// Number of atoms of the value support.
    pub n_atoms: usize,

    /// Explore with noisy heads instead of epsilon-greedy.
    pub noisy: bool,

    /// Initial noise scale of noisy heads.
    pub noisy_scale: f64,

    /// Use a dueling head.
    pub dueling: bool,

    /// Recurrent Q-networks are not supported; must be `false`.
    pub recurrent: bool,

    /// Experience memory. Prioritized if `per_config` is set.
    pub replay_memory: ReplayMemoryConfig,

    /// Loss on TD errors.
    pub critic_loss: CriticLoss,

    /// Coefficient of the soft update of the target network, `1.0` for a hard copy.
    pub tau: f64,

    /// Optimization steps between target network updates.
    pub target_update_interval: usize,

    /// Seed of exploration and noise.
    pub seed: u64,

    /// Device.
    pub device: Device,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            discount_factor: 0.99,
            width: 128,
            depth: 2,
            activation: Activation::Relu,
            opt_config: OptimizerConfig::default(),
            lr_scheduler: Some(CyclicLrConfig::default()),
            max_grad_norm: Some(100.0),
            epsilon: EpsilonSchedule::default(),
            categorical: false,
            v_min: -10.0,
            v_max: 10.0,
            n_atoms: 51,
            noisy: false,
            noisy_scale: 0.5,
            dueling: false,
            recurrent: false,
            replay_memory: ReplayMemoryConfig::default(),
            critic_loss: CriticLoss::SmoothL1,
            tau: 0.005,
            target_update_interval: 1,
            seed: 42,
            device: Device::Cpu,
        }
    }
}

impl DqnConfig {
    /// Sets the batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.discount_factor = v;
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

    /// Sets the activation of hidden layers.
    pub fn activation(mut self, v: Activation) -> Self {
        self.activation = v;
        self
    }

    /// Sets the optimizer.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets the learning rate of the optimizer.
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

    /// Sets the epsilon schedule.
    pub fn epsilon(mut self, v: EpsilonSchedule) -> Self {
        self.epsilon = v;
        self
    }

    /// Enables value distributions on `n_atoms` atoms in `[v_min, v_max]`.
    pub fn categorical(mut self, v_min: f32, v_max: f32, n_atoms: usize) -> Self {
        self.categorical = true;
        self.v_min = v_min;
        self.v_max = v_max;
        self.n_atoms = n_atoms;
        self
    }

    /// Enables noisy heads with the given initial scale.
    pub fn noisy(mut self, scale: f64) -> Self {
        self.noisy = true;
        self.noisy_scale = scale;
        self
    }

    /// Sets the dueling flag.
    pub fn dueling(mut self, v: bool) -> Self {
        self.dueling = v;
        self
    }

    /// Sets the experience memory.
    pub fn replay_memory(mut self, v: ReplayMemoryConfig) -> Self {
        self.replay_memory = v;
        self
    }

    /// Sets the capacity of the experience memory.
    pub fn memory_size(mut self, v: usize) -> Self {
        self.replay_memory = self.replay_memory.capacity(v);
        self
    }

    /// Enables or disables prioritized replay with default parameters.
    pub fn prioritized(mut self, v: bool) -> Self {
        let per_config = if v { Some(PerConfig::default()) } else { None };
        self.replay_memory = self.replay_memory.per_config(per_config);
        self
    }

    /// Sets the critic loss.
    pub fn critic_loss(mut self, v: CriticLoss) -> Self {
        self.critic_loss = v;
        self
    }

    /// Sets the soft update coefficient.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
        self
    }

    /// Sets the interval of target network updates.
    pub fn target_update_interval(mut self, v: usize) -> Self {
        self.target_update_interval = v;
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

    /// Configuration of the Q-network for an environment with the given sizes.
    pub fn qnet_config(&self, sizes: &EnvSizes) -> QNetConfig {
        QNetConfig {
            mlp: MlpConfig::new(sizes.state_size, self.width, self.depth, self.activation),
            action_sizes: sizes.action_sizes.clone(),
            n_atoms: self.categorical.then_some(self.n_atoms),
            dueling: self.dueling,
            noisy_scale: self.noisy.then_some(self.noisy_scale),
        }
    }

    pub(super) fn validate(&self, sizes: &EnvSizes) -> Result<()> {
        sizes.validate()?;
        let err = |msg: &str| -> Result<()> { Err(LockstepError::config(msg).into()) };
        if sizes.action_sizes.is_empty() || sizes.n_continuous() > 0 {
            return err("DQN needs discrete action heads only");
        }
        if self.recurrent {
            return err("recurrent Q-networks are not supported");
        }
        if self.batch_size == 0 {
            return err("batch size must be positive");
        }
        let eps = &self.epsilon;
        if !(eps.eps_decay > 0.0) {
            return err("epsilon decay must be positive");
        }
        if !(0.0..=1.0).contains(&eps.eps_start) || !(0.0..=1.0).contains(&eps.eps_end) {
            return err("epsilon must be in [0, 1]");
        }
        if self.target_update_interval == 0 {
            return err("target update interval must be positive");
        }
        if !(0.0..=1.0).contains(&self.discount_factor) {
            return err("discount factor must be in [0, 1]");
        }
        if self.categorical && (self.n_atoms < 2 || !(self.v_min < self.v_max)) {
            return err("categorical support needs at least 2 atoms and v_min < v_max");
        }
        Ok(())
    }

    /// Constructs [`DqnConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`DqnConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_dqn_config() -> Result<()> {
        let config = DqnConfig::default()
            .batch_size(16)
            .categorical(-5.0, 5.0, 21)
            .noisy(0.3)
            .prioritized(true)
            .learning_rate(3e-4);

        let dir = TempDir::new("dqn_config")?;
        let path = dir.path().join("dqn_config.yaml");
        config.save(&path)?;
        let config_ = DqnConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }

    #[test]
    fn test_invalid_epsilon_schedule() {
        let sizes = EnvSizes::discrete(lockstep_core::StateSize::Vector(4), vec![2]);
        assert!(DqnConfig::default().validate(&sizes).is_ok());
        for (eps_start, eps_end, eps_decay) in
            [(1.0, 0.0, 0.0), (1.0, 0.0, -5.0), (1.0, 0.0, f64::NAN), (1.5, 0.0, 10.0)]
        {
            let config = DqnConfig::default().epsilon(EpsilonSchedule {
                eps_start,
                eps_end,
                eps_decay,
            });
            let err = config.validate(&sizes).unwrap_err();
            assert!(err.downcast_ref::<LockstepError>().unwrap().is_config());
        }
    }
}
