//! Optimizers.
mod clip;
mod scheduler;
use anyhow::Result;
use candle_core::{backprop::GradStore, Var};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
pub use clip::clip_grad_norm;
pub use scheduler::{CyclicLr, CyclicLrConfig};
use serde::{Deserialize, Serialize};

/// Configuration of optimizer for training neural networks in an RL agent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// AdamW optimizer.
    AdamW {
        /// Learning rate.
        lr: f64,
        /// Decay rate of the first moment.
        #[serde(default = "default_beta1")]
        beta1: f64,
        /// Decay rate of the second moment.
        #[serde(default = "default_beta2")]
        beta2: f64,
        /// Term added to the denominator.
        #[serde(default = "default_eps")]
        eps: f64,
        /// Weight decay.
        #[serde(default = "default_weight_decay")]
        weight_decay: f64,
    },

    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
        /// Use the AMSGrad variant.
        #[serde(default)]
        amsgrad: bool,
    },
}

fn default_beta1() -> f64 {
    ParamsAdamW::default().beta1
}

fn default_beta2() -> f64 {
    ParamsAdamW::default().beta2
}

fn default_eps() -> f64 {
    ParamsAdamW::default().eps
}

fn default_weight_decay() -> f64 {
    ParamsAdamW::default().weight_decay
}

impl OptimizerConfig {
    /// Constructs an optimizer over the given variables.
    pub fn build(&self, vars: Vec<Var>) -> Result<Optimizer> {
        match &self {
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => {
                let params = ParamsAdamW {
                    lr: *lr,
                    beta1: *beta1,
                    beta2: *beta2,
                    eps: *eps,
                    weight_decay: *weight_decay,
                };
                let opt = AdamW::new(vars, params)?;
                Ok(Optimizer::AdamW(opt))
            }
            OptimizerConfig::Adam { lr, amsgrad } => {
                let params = ParamsAdam {
                    lr: *lr,
                    amsgrad: *amsgrad,
                    ..ParamsAdam::default()
                };
                let opt = Adam::new(vars, params)?;
                Ok(Optimizer::Adam(opt))
            }
        }
    }

    /// Learning rate.
    pub fn lr(&self) -> f64 {
        match self {
            Self::AdamW { lr, .. } => *lr,
            Self::Adam { lr, .. } => *lr,
        }
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f64) -> Self {
        match self {
            Self::AdamW {
                lr: _,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            },
            Self::Adam { lr: _, amsgrad } => Self::Adam { lr, amsgrad },
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            lr: 1e-3,
            amsgrad: true,
        }
    }
}

/// Optimizers.
///
/// This is a thin wrapper of [`candle_nn::Optimizer`] implementations.
pub enum Optimizer {
    /// AdamW optimizer.
    AdamW(AdamW),

    /// Adam optimizer.
    Adam(Adam),
}

impl Optimizer {
    /// Updates the parameters with precomputed gradients.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::AdamW(opt) => Ok(opt.step(grads)?),
            Self::Adam(opt) => Ok(opt.step(grads)?),
        }
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::AdamW(opt) => opt.learning_rate(),
            Self::Adam(opt) => opt.learning_rate(),
        }
    }

    /// Sets the learning rate.
    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::AdamW(opt) => opt.set_learning_rate(lr),
            Self::Adam(opt) => opt.set_learning_rate(lr),
        }
    }
}

/// An optimizer over a fixed set of variables, with gradient clipping and an
/// optional learning rate scheduler.
pub struct OptimizerSet {
    vars: Vec<Var>,
    opt: Optimizer,
    scheduler: Option<CyclicLr>,
    max_grad_norm: Option<f64>,
}

impl OptimizerSet {
    /// Builds the optimizer and its scheduler for `vars`.
    pub fn build(
        vars: Vec<Var>,
        opt_config: &OptimizerConfig,
        scheduler_config: Option<&CyclicLrConfig>,
        max_grad_norm: Option<f64>,
    ) -> Result<Self> {
        let mut opt = opt_config.build(vars.clone())?;
        let scheduler = scheduler_config.map(|c| c.build(opt_config.lr()));
        if let Some(scheduler) = &scheduler {
            opt.set_learning_rate(scheduler.lr());
        }
        Ok(Self {
            vars,
            opt,
            scheduler,
            max_grad_norm,
        })
    }

    /// Clips the gradients of the variables, steps the optimizer, then the scheduler.
    ///
    /// Returns the gradient norm before clipping.
    pub fn step(&mut self, grads: &mut GradStore) -> Result<f32> {
        let norm = match self.max_grad_norm {
            Some(max_norm) => clip_grad_norm(&self.vars, grads, max_norm)?,
            None => clip_grad_norm(&self.vars, grads, f64::INFINITY)?,
        };
        self.opt.step(grads)?;
        if let Some(scheduler) = &mut self.scheduler {
            let lr = scheduler.step();
            self.opt.set_learning_rate(lr);
        }
        Ok(norm)
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.opt.learning_rate()
    }
}
