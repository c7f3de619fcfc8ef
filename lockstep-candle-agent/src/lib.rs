//! RL agents implemented with [candle](https://crates.io/crates/candle-core).
//!
//! * [`dqn::Dqn`]: deep Q-learning with optional noisy layers, categorical (C51)
//!   value distributions, a dueling head and prioritized replay.
//! * [`ppo::Ppo`]: proximal policy optimization with discrete and continuous action
//!   heads and an optional LSTM.
//!
//! Both implement [`lockstep_core::Agent`] and can be driven by
//! [`lockstep_core::rollout::RolloutCoordinator`].
pub mod dqn;
pub mod mlp;
pub mod model;
pub mod noisy;
pub mod opt;
pub mod ppo;
pub mod util;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The main GPU device.
    Cuda(usize),
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl Device {
    /// Creates the corresponding [`candle_core::Device`].
    pub fn build(self) -> Result<candle_core::Device> {
        match self {
            Self::Cpu => Ok(candle_core::Device::Cpu),
            Self::Cuda(n) => Ok(candle_core::Device::new_cuda(n)?),
        }
    }
}
