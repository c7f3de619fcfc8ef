//! Linear layer with factorized Gaussian parameter noise.
//!
//! `y = (μ_w + σ_w ⊙ ε_w) x + μ_b + σ_b ⊙ ε_b` with `ε_w = f(ε_out) f(ε_in)^T`,
//! `ε_b = f(ε_out)` and `f(x) = sign(x) sqrt(|x|)`. Without a noise sample, or with
//! noise switched off, the layer uses the mean weights only.
use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{Init, VarBuilder};
use rand::Rng;
use rand_distr::StandardNormal;

/// Noisy linear layer.
pub struct NoisyLinear {
    weight_mu: Tensor,
    weight_sigma: Tensor,
    bias_mu: Tensor,
    bias_sigma: Tensor,
    in_dim: usize,
    out_dim: usize,
    device: Device,
    noise: Option<(Tensor, Tensor)>,
}

/// Creates a [`NoisyLinear`] with `σ` initialized to `sigma0 / sqrt(in_dim)`.
pub fn noisy_linear(
    in_dim: usize,
    out_dim: usize,
    sigma0: f64,
    vb: VarBuilder,
) -> Result<NoisyLinear> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let mu_init = Init::Uniform {
        lo: -bound,
        up: bound,
    };
    let sigma_init = Init::Const(sigma0 * bound);

    Ok(NoisyLinear {
        weight_mu: vb.get_with_hints((out_dim, in_dim), "weight_mu", mu_init)?,
        weight_sigma: vb.get_with_hints((out_dim, in_dim), "weight_sigma", sigma_init)?,
        bias_mu: vb.get_with_hints(out_dim, "bias_mu", mu_init)?,
        bias_sigma: vb.get_with_hints(out_dim, "bias_sigma", sigma_init)?,
        in_dim,
        out_dim,
        device: vb.device().clone(),
        noise: None,
    })
}

fn scaled_noise(n: usize, rng: &mut impl Rng) -> Vec<f32> {
    (0..n)
        .map(|_| {
            let x: f32 = rng.sample(StandardNormal);
            x.signum() * x.abs().sqrt()
        })
        .collect()
}

impl NoisyLinear {
    /// Draws a new noise sample.
    pub fn reset_noise(&mut self, rng: &mut impl Rng) -> Result<()> {
        let eps_in = Tensor::from_vec(scaled_noise(self.in_dim, rng), (1, self.in_dim), &self.device)?;
        let eps_out =
            Tensor::from_vec(scaled_noise(self.out_dim, rng), (self.out_dim, 1), &self.device)?;
        let eps_w = eps_out.broadcast_mul(&eps_in)?;
        let eps_b = eps_out.squeeze(1)?;
        self.noise = Some((eps_w, eps_b));
        Ok(())
    }

    /// Applies the layer to `[batch, in_dim]`, using the current noise sample if `noisy`.
    pub fn forward(&self, xs: &Tensor, noisy: bool) -> Result<Tensor> {
        let (w, b) = match (&self.noise, noisy) {
            (Some((eps_w, eps_b)), true) => (
                (&self.weight_mu + self.weight_sigma.mul(eps_w)?)?,
                (&self.bias_mu + self.bias_sigma.mul(eps_b)?)?,
            ),
            _ => (self.weight_mu.clone(), self.bias_mu.clone()),
        };
        Ok(xs.matmul(&w.t()?)?.broadcast_add(&b)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;
    use rand::{rngs::SmallRng, SeedableRng};

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        Ok((a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?)
    }

    #[test]
    fn test_noise_on_and_off() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut layer = noisy_linear(4, 3, 0.5, vb)?;
        let mut rng = SmallRng::seed_from_u64(0);
        let xs = Tensor::ones((2, 4), DType::F32, &Device::Cpu)?;

        // Without a sample the layer is deterministic.
        let y0 = layer.forward(&xs, true)?;
        let y1 = layer.forward(&xs, false)?;
        assert_eq!(max_abs_diff(&y0, &y1)?, 0.0);

        layer.reset_noise(&mut rng)?;
        let y2 = layer.forward(&xs, true)?;
        assert!(max_abs_diff(&y1, &y2)? > 0.0);
        assert_eq!(max_abs_diff(&y1, &layer.forward(&xs, false)?)?, 0.0);

        layer.reset_noise(&mut rng)?;
        let y3 = layer.forward(&xs, true)?;
        assert!(max_abs_diff(&y2, &y3)? > 0.0);
        Ok(())
    }

    #[test]
    fn test_sigma_receives_gradients() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut layer = noisy_linear(2, 2, 0.5, vb)?;
        layer.reset_noise(&mut SmallRng::seed_from_u64(1))?;
        let xs = Tensor::ones((1, 2), DType::F32, &Device::Cpu)?;
        let grads = layer.forward(&xs, true)?.sum_all()?.backward()?;
        assert!(grads.get(&layer.weight_sigma).is_some());
        assert!(grads.get(&layer.bias_mu).is_some());
        Ok(())
    }
}
