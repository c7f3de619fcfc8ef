//! Action-value network.
use crate::{
    mlp::{Mlp, MlpConfig},
    model::SubModel1,
    noisy::{noisy_linear, NoisyLinear},
};
use anyhow::Result;
use candle_core::{Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};
use lockstep_core::error::LockstepError;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration of [`QNet`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct QNetConfig {
    /// Trunk.
    pub mlp: MlpConfig,

    /// Number of actions of each discrete head.
    pub action_sizes: Vec<usize>,

    /// Number of atoms of the value distribution, `None` for scalar values.
    pub n_atoms: Option<usize>,

    /// Split every head into a state value and action advantages.
    pub dueling: bool,

    /// Initial noise scale of noisy heads, `None` for plain linear heads.
    pub noisy_scale: Option<f64>,
}

enum Head {
    Linear(Linear),
    Noisy(NoisyLinear),
}

impl Head {
    fn build(in_dim: usize, out_dim: usize, noisy_scale: Option<f64>, vb: VarBuilder) -> Result<Self> {
        Ok(match noisy_scale {
            None => Self::Linear(linear(in_dim, out_dim, vb)?),
            Some(scale) => Self::Noisy(noisy_linear(in_dim, out_dim, scale, vb)?),
        })
    }

    fn forward(&self, xs: &Tensor, noisy: bool) -> Result<Tensor> {
        match self {
            Self::Linear(l) => Ok(l.forward(xs)?),
            Self::Noisy(l) => l.forward(xs, noisy),
        }
    }

    fn reset_noise(&mut self, rng: &mut impl Rng) -> Result<()> {
        match self {
            Self::Linear(_) => Ok(()),
            Self::Noisy(l) => l.reset_noise(rng),
        }
    }
}

/// Action-value network with one output per discrete head.
///
/// For head `h` with `A_h` actions the output is `[batch, A_h]` action values, or
/// `[batch, A_h, n_atoms]` logits of the value distribution.
pub struct QNet {
    config: QNetConfig,
    trunk: Mlp,
    advantages: Vec<Head>,
    values: Vec<Head>,
}

impl QNet {
    fn atoms(&self) -> usize {
        self.config.n_atoms.unwrap_or(1)
    }

    /// Forward pass, applying the current noise sample of noisy heads if `noisy`.
    pub fn forward_with(&self, xs: &Tensor, noisy: bool) -> Result<Vec<Tensor>> {
        let feat = self.trunk.forward(xs)?;
        let batch_size = feat.dim(0)?;
        let atoms = self.atoms();

        let mut outs = Vec::with_capacity(self.advantages.len());
        for (h, n_actions) in self.config.action_sizes.iter().enumerate() {
            let adv = self.advantages[h]
                .forward(&feat, noisy)?
                .reshape((batch_size, *n_actions, atoms))?;
            let q = match self.values.get(h) {
                None => adv,
                Some(value) => {
                    let v = value.forward(&feat, noisy)?.unsqueeze(1)?;
                    let adv = adv.broadcast_sub(&adv.mean_keepdim(1)?)?;
                    v.broadcast_add(&adv)?
                }
            };
            outs.push(match self.config.n_atoms {
                None => q.squeeze(D::Minus1)?,
                Some(_) => q,
            });
        }
        Ok(outs)
    }

    /// Draws new noise for all noisy heads.
    pub fn reset_noise(&mut self, rng: &mut impl Rng) -> Result<()> {
        for head in self.advantages.iter_mut().chain(self.values.iter_mut()) {
            head.reset_noise(rng)?;
        }
        Ok(())
    }
}

impl SubModel1 for QNet {
    type Config = QNetConfig;
    type Input = Tensor;
    type Output = Vec<Tensor>;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        if config.action_sizes.is_empty() {
            return Err(LockstepError::config("Q-network needs at least one discrete head").into());
        }
        let atoms = config.n_atoms.unwrap_or(1);
        let trunk = Mlp::build(vb.clone(), config.mlp.clone())?;
        let width = trunk.out_dim();

        let advantages = config
            .action_sizes
            .iter()
            .enumerate()
            .map(|(h, &n)| {
                Head::build(width, n * atoms, config.noisy_scale, vb.pp(format!("head{}", h)))
            })
            .collect::<Result<Vec<_>>>()?;
        let values = match config.dueling {
            false => vec![],
            true => (0..config.action_sizes.len())
                .map(|h| Head::build(width, atoms, config.noisy_scale, vb.pp(format!("value{}", h))))
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            config,
            trunk,
            advantages,
            values,
        })
    }

    /// Forward pass with the mean weights of noisy heads.
    fn forward(&self, xs: &Self::Input) -> Result<Vec<Tensor>> {
        self.forward_with(xs, false)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mlp::Activation;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use lockstep_core::StateSize;
    use rand::{rngs::SmallRng, SeedableRng};

    fn config(n_atoms: Option<usize>, dueling: bool) -> QNetConfig {
        QNetConfig {
            mlp: MlpConfig::new(StateSize::Vector(4), 16, 2, Activation::Relu),
            action_sizes: vec![2, 3],
            n_atoms,
            dueling,
            noisy_scale: None,
        }
    }

    fn build(config: QNetConfig) -> Result<QNet> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        QNet::build(vb, config)
    }

    #[test]
    fn test_output_shapes() -> Result<()> {
        let xs = Tensor::randn(0f32, 1.0, (5, 4), &Device::Cpu)?;

        let q = build(config(None, false))?.forward(&xs)?;
        assert_eq!(q[0].dims(), &[5, 2]);
        assert_eq!(q[1].dims(), &[5, 3]);

        let q = build(config(Some(7), true))?.forward(&xs)?;
        assert_eq!(q[0].dims(), &[5, 2, 7]);
        assert_eq!(q[1].dims(), &[5, 3, 7]);
        Ok(())
    }

    #[test]
    fn test_noisy_heads() -> Result<()> {
        let mut config = config(None, true);
        config.noisy_scale = Some(0.5);
        let mut qnet = build(config)?;
        let mut rng = SmallRng::seed_from_u64(3);
        let xs = Tensor::randn(0f32, 1.0, (1, 4), &Device::Cpu)?;

        qnet.reset_noise(&mut rng)?;
        let clean: Vec<Vec<f32>> = qnet.forward(&xs)?[0].to_vec2()?;
        let noisy: Vec<Vec<f32>> = qnet.forward_with(&xs, true)?[0].to_vec2()?;
        assert_ne!(clean, noisy);
        Ok(())
    }
}
