use anyhow::Result;
use candle_core::Tensor;
use lockstep_core::{error::LockstepError, StateSize};
use serde::{Deserialize, Serialize};

/// Activation applied after every hidden layer.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum Activation {
    /// Rectified linear unit.
    Relu,

    /// Hyperbolic tangent.
    Tanh,
}

impl Activation {
    pub(crate) fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Relu => xs.relu(),
            Self::Tanh => xs.tanh(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Mlp`](super::Mlp).
pub struct MlpConfig {
    pub(super) state_size: StateSize,
    pub(super) width: usize,
    pub(super) depth: usize,
    pub(super) activation: Activation,
    pub(super) recurrent: bool,
}

impl MlpConfig {
    /// Creates configuration of a feed-forward trunk.
    ///
    /// * `depth` - number of hidden layers, each `width` units wide.
    pub fn new(state_size: StateSize, width: usize, depth: usize, activation: Activation) -> Self {
        Self {
            state_size,
            width,
            depth,
            activation,
            recurrent: false,
        }
    }

    /// Inserts an LSTM of `width` units before the dense layers.
    pub fn recurrent(mut self, v: bool) -> Self {
        self.recurrent = v;
        self
    }

    /// Number of output features.
    pub fn out_dim(&self) -> usize {
        self.width
    }

    pub(super) fn validate(&self) -> Result<()> {
        if self.depth == 0 {
            return Err(LockstepError::config("network depth must be at least 1").into());
        }
        if self.width == 0 {
            return Err(LockstepError::config("network width must be positive").into());
        }
        if self.state_size.numel() == 0 {
            return Err(LockstepError::config("state size must be positive").into());
        }
        Ok(())
    }
}
