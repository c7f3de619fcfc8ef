//! Utilities.
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use log::{trace, warn};
use lockstep_core::error::LockstepError;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Critic loss type.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum CriticLoss {
    /// Mean squared error.
    Mse,

    /// Smooth L1 loss.
    SmoothL1,
}

impl CriticLoss {
    /// Element-wise loss between `x` and `y`, without reduction.
    pub fn elementwise(&self, x: &Tensor, y: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Mse => (x - y)?.sqr(),
            Self::SmoothL1 => smooth_l1(x, y),
        }
    }
}

/// Apply soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    trace!("track with tau = {}", tau);
    let dest = dest
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("poisoned varmap"))?;
    let src = src
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("poisoned varmap"))?;

    for (k, v_dest) in dest.iter() {
        let v_src = src
            .get(k)
            .ok_or_else(|| LockstepError::config(format!("variable {} is missing", k)))?;
        let t = ((tau * v_src.as_tensor())? + (1.0 - tau) * v_dest.as_tensor())?;
        v_dest.set(&t)?;
    }

    Ok(())
}

/// Element-wise smooth L1 loss with threshold 1.
///
/// See <https://pytorch.org/docs/stable/generated/torch.nn.SmoothL1Loss.html>.
pub fn smooth_l1(x: &Tensor, y: &Tensor) -> candle_core::Result<Tensor> {
    let d = (x - y)?.abs()?;
    let m1 = d.lt(1.0)?.to_dtype(DType::F32)?;
    let m2 = (1.0 - &m1)?;
    ((0.5 * m1)? * d.sqr()?)? + (m2 * (d - 0.5)?)?
}

/// Fails with [`LockstepError::Numerical`] if the scalar `loss` is not finite.
pub fn check_finite(loss: &Tensor, what: &str) -> Result<f32> {
    let v = loss.to_scalar::<f32>()?;
    if v.is_finite() {
        Ok(v)
    } else {
        warn!("Rejected non-finite {}: {}", what, v);
        Err(LockstepError::Numerical(format!("{} is {}", what, v)).into())
    }
}

/// Converts host states to a `[batch, state_dim]` tensor.
pub fn states_to_tensor(states: &[Vec<f32>], device: &Device) -> Result<Tensor> {
    let dim = states.first().map(|s| s.len()).unwrap_or(0);
    if let Some(s) = states.iter().find(|s| s.len() != dim) {
        return Err(LockstepError::BatchShape(format!(
            "state of length {} in a batch of length {}",
            s.len(),
            dim
        ))
        .into());
    }
    let data = states.iter().flatten().copied().collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, (states.len(), dim), device)?)
}

/// Evenly spaced values from `start` to `end`, both included.
pub fn linspace(start: f32, end: f32, n: usize, device: &Device) -> Result<Tensor> {
    let step = if n > 1 {
        (end - start) / (n - 1) as f32
    } else {
        0.0
    };
    let v = (0..n).map(|i| start + step * i as f32).collect::<Vec<_>>();
    Ok(Tensor::from_vec(v, n, device)?)
}

/// Index of the largest value.
pub fn argmax(v: &[f32]) -> usize {
    let mut best = 0;
    for (i, x) in v.iter().enumerate() {
        if *x > v[best] {
            best = i;
        }
    }
    best
}

fn model_index(path: &Path, component: &str) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    let n = name
        .strip_prefix(component)?
        .strip_prefix('_')?
        .strip_suffix(".safetensors")?;
    n.parse().ok()
}

/// Highest `n` among files `{component}_{n}.safetensors` in `dir`.
pub fn latest_model_index(dir: &Path, component: &str) -> Result<Option<usize>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut latest = None;
    for entry in fs::read_dir(dir)? {
        if let Some(n) = model_index(&entry?.path(), component) {
            latest = latest.max(Some(n));
        }
    }
    Ok(latest)
}

/// Path of the next artifact of `component`, one past the highest one in `dir`.
pub fn next_model_path(dir: &Path, component: &str) -> Result<PathBuf> {
    let n = latest_model_index(dir, component)?.map_or(1, |n| n + 1);
    Ok(dir.join(format!("{}_{}.safetensors", component, n)))
}

/// Path of the highest-numbered artifact of `component` in `dir`.
pub fn latest_model_path(dir: &Path, component: &str) -> Result<PathBuf> {
    match latest_model_index(dir, component)? {
        Some(n) => Ok(dir.join(format!("{}_{}.safetensors", component, n))),
        None => Err(LockstepError::config(format!(
            "no saved {} in {}",
            component,
            dir.display()
        ))
        .into()),
    }
}
