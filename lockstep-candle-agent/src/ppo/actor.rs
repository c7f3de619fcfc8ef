//! Policy network of PPO.
use crate::{
    mlp::{Mlp, MlpConfig},
    model::{RecurrentSubModel, SubModel1},
};
use anyhow::Result;
use candle_core::{DType, Module, Tensor, D};
use candle_nn::{linear, ops::log_softmax, rnn::LSTMState, Linear, VarBuilder};
use lockstep_core::error::LockstepError;
use serde::{Deserialize, Serialize};

// 0.5 * ln(2π)
const HALF_LOG_2PI: f64 = 0.918_938_533_204_672_7;

/// Configuration of [`Actor`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ActorConfig {
    /// Trunk, possibly recurrent.
    pub mlp: MlpConfig,

    /// Number of actions of each discrete head.
    pub action_sizes: Vec<usize>,

    /// Number of continuous heads.
    pub n_continuous: usize,

    /// Bounds of the log standard deviation of continuous heads.
    pub log_std_range: (f64, f64),
}

/// Distribution parameters produced by [`Actor`].
pub struct ActorOutput {
    /// `[batch, A_h]` logits of each discrete head.
    pub logits: Vec<Tensor>,

    /// `[batch, n_continuous]` means of the continuous heads.
    pub mean: Option<Tensor>,

    /// `[batch, n_continuous]` clamped log standard deviations.
    pub log_std: Option<Tensor>,
}

impl ActorOutput {
    /// Detaches all tensors.
    pub fn detach(self) -> Self {
        Self {
            logits: self.logits.into_iter().map(|t| t.detach()).collect(),
            mean: self.mean.map(|t| t.detach()),
            log_std: self.log_std.map(|t| t.detach()),
        }
    }
}

/// Actor with independent categorical and Gaussian heads on a shared trunk.
pub struct Actor {
    config: ActorConfig,
    trunk: Mlp,
    heads: Vec<Linear>,
    mean: Option<Linear>,
    log_std: Option<Linear>,
}

impl Actor {
    fn n_heads(&self) -> usize {
        self.config.action_sizes.len() + self.config.n_continuous
    }

    fn heads(&self, feat: &Tensor) -> Result<ActorOutput> {
        let logits = self
            .heads
            .iter()
            .map(|h| h.forward(feat))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let mean = self.mean.as_ref().map(|l| l.forward(feat)).transpose()?;
        let (min, max) = self.config.log_std_range;
        let log_std = self
            .log_std
            .as_ref()
            .map(|l| l.forward(feat)?.clamp(min, max))
            .transpose()?;
        Ok(ActorOutput {
            logits,
            mean,
            log_std,
        })
    }

    /// Joint log-probability and entropy of actions under `out`.
    ///
    /// `discrete` is `[batch, n_discrete]` (u32) and `continuous` is
    /// `[batch, n_continuous]`. Heads are independent, so the log-probability is
    /// summed over heads while the entropy is averaged over them. Both results are
    /// `[batch]`.
    pub fn log_prob_entropy(
        &self,
        out: &ActorOutput,
        discrete: Option<&Tensor>,
        continuous: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let first = out
            .logits
            .first()
            .or(out.mean.as_ref())
            .ok_or_else(|| LockstepError::config("actor has no heads"))?;
        let (batch_size, device) = (first.dim(0)?, first.device().clone());
        let mut log_p = Tensor::zeros(batch_size, DType::F32, &device)?;
        let mut entropy = Tensor::zeros(batch_size, DType::F32, &device)?;

        if !out.logits.is_empty() {
            let acts = discrete
                .ok_or_else(|| LockstepError::BatchShape("missing discrete actions".into()))?;
            for (h, logits) in out.logits.iter().enumerate() {
                let lp = log_softmax(logits, D::Minus1)?;
                let a = acts.narrow(1, h, 1)?.contiguous()?;
                log_p = (log_p + lp.gather(&a, 1)?.squeeze(1)?)?;
                entropy = (entropy - (lp.exp()? * &lp)?.sum(D::Minus1)?)?;
            }
        }

        if let (Some(mean), Some(log_std)) = (&out.mean, &out.log_std) {
            let acts = continuous
                .ok_or_else(|| LockstepError::BatchShape("missing continuous actions".into()))?;
            let z = ((acts - mean)? / log_std.exp()?)?;
            let lp = (((z.sqr()? * -0.5)? - log_std)? - HALF_LOG_2PI)?;
            log_p = (log_p + lp.sum(D::Minus1)?)?;
            entropy = (entropy + (log_std + (0.5 + HALF_LOG_2PI))?.sum(D::Minus1)?)?;
        }

        Ok((log_p, (entropy / self.n_heads() as f64)?))
    }
}

impl SubModel1 for Actor {
    type Config = ActorConfig;
    type Input = Tensor;
    type Output = ActorOutput;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        if config.action_sizes.is_empty() && config.n_continuous == 0 {
            return Err(LockstepError::config("actor needs at least one action head").into());
        }
        let trunk = Mlp::build(vb.clone(), config.mlp.clone())?;
        let width = trunk.out_dim();
        let heads = config
            .action_sizes
            .iter()
            .enumerate()
            .map(|(h, &n)| linear(width, n, vb.pp(format!("head{}", h))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let (mean, log_std) = match config.n_continuous {
            0 => (None, None),
            n => (
                Some(linear(width, n, vb.pp("mean"))?),
                Some(linear(width, n, vb.pp("log_std"))?),
            ),
        };

        Ok(Self {
            config,
            trunk,
            heads,
            mean,
            log_std,
        })
    }

    fn forward(&self, xs: &Self::Input) -> Result<ActorOutput> {
        self.heads(&self.trunk.forward(xs)?)
    }
}

impl RecurrentSubModel for Actor {
    fn is_recurrent(&self) -> bool {
        self.trunk.is_recurrent()
    }

    fn zero_state(&self, batch_size: usize) -> Result<LSTMState> {
        self.trunk.zero_state(batch_size)
    }

    fn forward_step(&self, xs: &Tensor, state: &LSTMState) -> Result<(ActorOutput, LSTMState)> {
        let (feat, state) = self.trunk.forward_step(xs, state)?;
        Ok((self.heads(&feat)?, state))
    }

    fn forward_seq(&self, xs: &Tensor) -> Result<ActorOutput> {
        self.heads(&self.trunk.forward_seq(xs)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mlp::Activation;
    use candle_core::Device;
    use candle_nn::VarMap;
    use lockstep_core::StateSize;

    fn build(action_sizes: Vec<usize>, n_continuous: usize) -> Result<Actor> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = ActorConfig {
            mlp: MlpConfig::new(StateSize::Vector(3), 8, 1, Activation::Tanh),
            action_sizes,
            n_continuous,
            log_std_range: (-5.0, 2.0),
        };
        Actor::build(vb, config)
    }

    #[test]
    fn test_discrete_log_prob_and_entropy() -> Result<()> {
        let actor = build(vec![4], 0)?;
        let xs = Tensor::randn(0f32, 1.0, (2, 3), &Device::Cpu)?;
        let out = actor.forward(&xs)?;
        let acts = Tensor::new(&[[1u32], [3]], &Device::Cpu)?;
        let (log_p, entropy) = actor.log_prob_entropy(&out, Some(&acts), None)?;

        let logits: Vec<Vec<f32>> = out.logits[0].to_vec2()?;
        let log_p: Vec<f32> = log_p.to_vec1()?;
        let entropy: Vec<f32> = entropy.to_vec1()?;
        for (i, a) in [1usize, 3].into_iter().enumerate() {
            let z: f32 = logits[i].iter().map(|l| l.exp()).sum();
            let p: Vec<f32> = logits[i].iter().map(|l| l.exp() / z).collect();
            assert!((log_p[i] - p[a].ln()).abs() < 1e-5);
            let h: f32 = -p.iter().map(|p| p * p.ln()).sum::<f32>();
            assert!((entropy[i] - h).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_gaussian_log_prob_and_entropy() -> Result<()> {
        let actor = build(vec![], 2)?;
        let xs = Tensor::randn(0f32, 1.0, (1, 3), &Device::Cpu)?;
        let out = actor.forward(&xs)?;
        let acts = Tensor::new(&[[0.3f32, -0.7]], &Device::Cpu)?;
        let (log_p, entropy) = actor.log_prob_entropy(&out, None, Some(&acts))?;

        let mean: Vec<Vec<f32>> = out.mean.as_ref().unwrap().to_vec2()?;
        let log_std: Vec<Vec<f32>> = out.log_std.as_ref().unwrap().to_vec2()?;
        let mut expected_lp = 0.0;
        let mut expected_h = 0.0;
        for (j, a) in [0.3f32, -0.7].into_iter().enumerate() {
            let z = (a - mean[0][j]) / log_std[0][j].exp();
            expected_lp += -0.5 * z * z - log_std[0][j] - HALF_LOG_2PI as f32;
            expected_h += 0.5 + HALF_LOG_2PI as f32 + log_std[0][j];
        }
        let log_p: Vec<f32> = log_p.to_vec1()?;
        let entropy: Vec<f32> = entropy.to_vec1()?;
        assert!((log_p[0] - expected_lp).abs() < 1e-4);
        assert!((entropy[0] - expected_h / 2.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_missing_actions() -> Result<()> {
        let actor = build(vec![2], 1)?;
        let xs = Tensor::zeros((1, 3), DType::F32, &Device::Cpu)?;
        let out = actor.forward(&xs)?;
        let acts = Tensor::new(&[[0u32]], &Device::Cpu)?;
        let err = actor.log_prob_entropy(&out, Some(&acts), None).unwrap_err();
        assert!(err.downcast_ref::<LockstepError>().is_some());
        Ok(())
    }
}
