use anyhow::Result;
use candle_core::{backprop::GradStore, Var};

/// Rescales the gradients of `vars` so that their joint L2 norm is at most `max_norm`.
///
/// Variables without a gradient are skipped. Returns the norm before rescaling.
pub fn clip_grad_norm(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f32> {
    let mut sq_sum = 0f64;
    for var in vars.iter() {
        if let Some(g) = grads.get(var.as_tensor()) {
            sq_sum += g.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = sq_sum.sqrt();

    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars.iter() {
            if let Some(g) = grads.get(var.as_tensor()) {
                let g = (g * scale)?;
                grads.insert(var.as_tensor(), g);
            }
        }
    }

    Ok(norm as f32)
}
