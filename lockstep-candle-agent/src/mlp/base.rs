use super::MlpConfig;
use crate::model::{RecurrentSubModel, SubModel1};
use anyhow::Result;
use candle_core::{Device, Module, Tensor};
use candle_nn::{
    conv2d, linear,
    rnn::{lstm, LSTMConfig, LSTMState, LSTM, RNN},
    Conv2d, Conv2dConfig, Linear, VarBuilder,
};
use lockstep_core::StateSize;

// Single-channel convolution over a (h, w) grid, flattened afterwards.
struct GridEncoder {
    conv: Conv2d,
    h: usize,
    w: usize,
}

/// Multilayer perceptron trunk.
///
/// Every layer, including the last, is followed by the configured activation.
pub struct Mlp {
    config: MlpConfig,
    device: Device,
    encoder: Option<GridEncoder>,
    lstm: Option<LSTM>,
    layers: Vec<Linear>,
}

impl Mlp {
    /// Number of output features.
    pub fn out_dim(&self) -> usize {
        self.config.width
    }

    fn encode(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = xs.to_device(&self.device)?;
        match &self.encoder {
            None => Ok(xs),
            Some(GridEncoder { conv, h, w }) => {
                let batch_size = xs.dim(0)?;
                let xs = conv.forward(&xs.reshape((batch_size, 1, *h, *w))?)?;
                Ok(self.config.activation.forward(&xs)?.flatten_from(1)?)
            }
        }
    }

    fn dense(&self, xs: Tensor) -> Result<Tensor> {
        let mut xs = xs;
        for layer in self.layers.iter() {
            xs = self.config.activation.forward(&layer.forward(&xs)?)?;
        }
        Ok(xs)
    }
}

impl SubModel1 for Mlp {
    type Config = MlpConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();
        let vb = vb.pp("mlp");
        let width = config.width;

        let (encoder, mut in_dim) = match config.state_size {
            StateSize::Vector(n) => (None, n),
            StateSize::Grid(h, w) => {
                let kernel = h.min(w);
                let padding = kernel / 2;
                let conv_config = Conv2dConfig {
                    padding,
                    ..Default::default()
                };
                let conv = conv2d(1, width, kernel, conv_config, vb.pp("conv"))?;
                let out_h = h + 2 * padding - kernel + 1;
                let out_w = w + 2 * padding - kernel + 1;
                (Some(GridEncoder { conv, h, w }), width * out_h * out_w)
            }
        };

        let lstm = match config.recurrent {
            true => {
                let l = lstm(in_dim, width, LSTMConfig::default(), vb.pp("lstm"))?;
                in_dim = width;
                Some(l)
            }
            false => None,
        };

        let layers = (0..config.depth)
            .map(|i| {
                let d = if i == 0 { in_dim } else { width };
                linear(d, width, vb.pp(format!("ln{}", i)))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            config,
            device,
            encoder,
            lstm,
            layers,
        })
    }

    /// Maps `[batch, state_dim]` to `[batch, width]`.
    ///
    /// A recurrent trunk starts from the zero state.
    fn forward(&self, xs: &Self::Input) -> Result<Tensor> {
        match &self.lstm {
            None => self.dense(self.encode(xs)?),
            Some(_) => {
                let state = self.zero_state(xs.dim(0)?)?;
                Ok(self.forward_step(xs, &state)?.0)
            }
        }
    }
}

impl RecurrentSubModel for Mlp {
    fn is_recurrent(&self) -> bool {
        self.lstm.is_some()
    }

    fn zero_state(&self, batch_size: usize) -> Result<LSTMState> {
        match &self.lstm {
            Some(lstm) => Ok(lstm.zero_state(batch_size)?),
            None => {
                let z = Tensor::zeros((batch_size, self.config.width), candle_core::DType::F32, &self.device)?;
                Ok(LSTMState::new(z.clone(), z))
            }
        }
    }

    fn forward_step(&self, xs: &Tensor, state: &LSTMState) -> Result<(Tensor, LSTMState)> {
        let xs = self.encode(xs)?;
        match &self.lstm {
            None => Ok((self.dense(xs)?, state.clone())),
            Some(lstm) => {
                let state = lstm.step(&xs, state)?;
                Ok((self.dense(state.h().clone())?, state))
            }
        }
    }

    fn forward_seq(&self, xs: &Tensor) -> Result<Tensor> {
        // [1, len, state_dim] -> [len, state_dim]
        let xs = self.encode(&xs.squeeze(0)?)?;
        match &self.lstm {
            None => self.dense(xs),
            Some(lstm) => {
                let states = lstm.seq(&xs.unsqueeze(0)?)?;
                let hs = lstm.states_to_tensor(&states)?.squeeze(0)?;
                self.dense(hs)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mlp::Activation;
    use candle_core::DType;
    use candle_nn::VarMap;
    use lockstep_core::error::LockstepError;

    fn build(config: MlpConfig) -> Result<Mlp> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Mlp::build(vb, config)
    }

    #[test]
    fn test_vector_trunk() -> Result<()> {
        let mlp = build(MlpConfig::new(StateSize::Vector(4), 16, 2, Activation::Relu))?;
        let xs = Tensor::randn(0f32, 1.0, (3, 4), &Device::Cpu)?;
        assert_eq!(mlp.forward(&xs)?.dims(), &[3, 16]);
        Ok(())
    }

    #[test]
    fn test_grid_trunk() -> Result<()> {
        let mlp = build(MlpConfig::new(StateSize::Grid(3, 5), 8, 1, Activation::Tanh))?;
        let xs = Tensor::randn(0f32, 1.0, (2, 15), &Device::Cpu)?;
        assert_eq!(mlp.forward(&xs)?.dims(), &[2, 8]);
        Ok(())
    }

    #[test]
    fn test_invalid_depth() {
        let err = build(MlpConfig::new(StateSize::Vector(4), 16, 0, Activation::Relu))
            .err()
            .unwrap();
        assert!(err.downcast_ref::<LockstepError>().unwrap().is_config());
    }

    #[test]
    fn test_sequence_matches_steps() -> Result<()> {
        let config = MlpConfig::new(StateSize::Vector(3), 8, 2, Activation::Tanh).recurrent(true);
        let mlp = build(config)?;
        let xs = Tensor::randn(0f32, 1.0, (1, 5, 3), &Device::Cpu)?;
        let seq = mlp.forward_seq(&xs)?;
        assert_eq!(seq.dims(), &[5, 8]);

        let mut state = mlp.zero_state(1)?;
        for t in 0..5 {
            let x = xs.get(0)?.get(t)?.unsqueeze(0)?;
            let (y, s) = mlp.forward_step(&x, &state)?;
            state = s;
            let diff = (y.squeeze(0)? - seq.get(t)?)?.abs()?.max(0)?.to_scalar::<f32>()?;
            assert!(diff < 1e-5);
        }
        Ok(())
    }
}
