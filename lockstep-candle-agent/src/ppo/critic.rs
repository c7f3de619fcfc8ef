//! State-value network of PPO.
use crate::{
    mlp::{Mlp, MlpConfig},
    model::SubModel1,
};
use anyhow::Result;
use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

/// Configuration of [`Critic`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct CriticConfig {
    /// Feed-forward trunk.
    pub mlp: MlpConfig,
}

/// Maps `[batch, state_dim]` states to `[batch]` values.
pub struct Critic {
    trunk: Mlp,
    value: Linear,
}

impl SubModel1 for Critic {
    type Config = CriticConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let trunk = Mlp::build(vb.clone(), config.mlp)?;
        let value = linear(trunk.out_dim(), 1, vb.pp("value"))?;
        Ok(Self { trunk, value })
    }

    fn forward(&self, xs: &Self::Input) -> Result<Tensor> {
        let feat = self.trunk.forward(xs)?;
        Ok(self.value.forward(&feat)?.squeeze(1)?)
    }
}
