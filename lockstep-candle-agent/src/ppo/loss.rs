//! Loss terms of PPO.
use anyhow::Result;
use candle_core::Tensor;

/// Clipped surrogate `-mean(min(r A, clip(r, 1 - eps, 1 + eps) A))` with
/// `r = exp(log_p - old_log_p)`.
pub fn clipped_surrogate(
    log_p: &Tensor,
    old_log_p: &Tensor,
    advantages: &Tensor,
    clip_eps: f64,
) -> Result<Tensor> {
    let ratio = (log_p - old_log_p)?.exp()?;
    let surr1 = (&ratio * advantages)?;
    let surr2 = (ratio.clamp(1.0 - clip_eps, 1.0 + clip_eps)? * advantages)?;
    Ok(surr1.minimum(&surr2)?.mean_all()?.neg()?)
}

/// Mean squared error of `values` to `returns`.
///
/// With `clip_range`, the element-wise maximum of that error and the error of the
/// value clipped to `old_values ± clip_range`.
pub fn value_loss(
    values: &Tensor,
    old_values: &Tensor,
    returns: &Tensor,
    clip_range: Option<f64>,
) -> Result<Tensor> {
    let err = (values - returns)?.sqr()?;
    let err = match clip_range {
        None => err,
        Some(c) => {
            let clipped = (old_values + (values - old_values)?.clamp(-c, c)?)?;
            err.maximum(&(clipped - returns)?.sqr()?)?
        }
    };
    Ok(err.mean_all()?)
}

/// `policy_loss + value_coef * value_loss - entropy_coef * entropy`.
pub fn total_loss(
    policy_loss: &Tensor,
    value_loss: &Tensor,
    entropy: &Tensor,
    value_coef: f64,
    entropy_coef: f64,
) -> Result<Tensor> {
    Ok(((policy_loss + (value_loss * value_coef)?)? - (entropy * entropy_coef)?)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;

    fn t(v: &[f32]) -> Tensor {
        Tensor::new(v, &Device::Cpu).unwrap()
    }

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_clipped_surrogate() -> Result<()> {
        // Ratios 1.5, 0.5, 1.1, 0.5.
        let log_p = t(&[1.5f32.ln(), 0.5f32.ln(), 1.1f32.ln(), 0.5f32.ln()]);
        let old_log_p = t(&[0.0; 4]);
        let advantages = t(&[1.0, 1.0, -2.0, -1.0]);
        // min(rA, clip(r)A) = 1.2, 0.5, -2.2, -0.8
        let loss = clipped_surrogate(&log_p, &old_log_p, &advantages, 0.2)?;
        assert!((scalar(&loss) - 0.325).abs() < 1e-5);

        // Without clipping in reach the loss is -mean(rA).
        let loss = clipped_surrogate(&log_p, &old_log_p, &advantages, 10.0)?;
        assert!((scalar(&loss) - 0.175).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_value_loss() -> Result<()> {
        let values = t(&[1.0, 3.0]);
        let old_values = t(&[0.0, 2.5]);
        let returns = t(&[2.0, 2.0]);

        let loss = value_loss(&values, &old_values, &returns, None)?;
        assert!((scalar(&loss) - 1.0).abs() < 1e-6);

        // Clipped values 0.2 and 2.7 give errors 3.24 and 0.49.
        let loss = value_loss(&values, &old_values, &returns, Some(0.2))?;
        assert!((scalar(&loss) - 2.12).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_total_loss() -> Result<()> {
        let s = |v: f32| Tensor::new(v, &Device::Cpu);
        let loss = total_loss(&s(0.325)?, &s(2.12)?, &s(0.7)?, 0.5, 0.01)?;
        assert!((scalar(&loss) - 1.378).abs() < 1e-5);
        Ok(())
    }
}
