//! Value distributions on a fixed support (C51).
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::ops::softmax;

/// Expected action values `Σ_j p_j z_j` of logits `[batch, n_actions, n_atoms]`.
pub fn expected_values(logits: &Tensor, support: &Tensor) -> Result<Tensor> {
    let probs = softmax(logits, D::Minus1)?;
    Ok(probs.broadcast_mul(support)?.sum(D::Minus1)?)
}

/// Projects the distributions `r + γ (1 - done) z` onto the support
/// `linspace(v_min, v_max, n_atoms)`.
///
/// `probs[i]` is the distribution of the next state of sample `i`; `not_dones[i]` is
/// 0 for terminal transitions, in which case all mass lands on `r_i`.
pub fn project(
    probs: &[Vec<f32>],
    rewards: &[f32],
    not_dones: &[f32],
    gamma: f32,
    v_min: f32,
    v_max: f32,
) -> Vec<Vec<f32>> {
    probs
        .iter()
        .zip(rewards.iter().zip(not_dones.iter()))
        .map(|(p, (&r, &not_done))| {
            let n_atoms = p.len();
            let delta_z = (v_max - v_min) / (n_atoms - 1) as f32;
            let mut m = vec![0f32; n_atoms];
            for (j, &p_j) in p.iter().enumerate() {
                let z_j = v_min + delta_z * j as f32;
                let tz = (r + gamma * not_done * z_j).clamp(v_min, v_max);
                let b = (tz - v_min) / delta_z;
                let l = b.floor() as usize;
                let u = b.ceil() as usize;
                if l == u {
                    m[l.min(n_atoms - 1)] += p_j;
                } else {
                    m[l] += p_j * (u as f32 - b);
                    m[u.min(n_atoms - 1)] += p_j * (b - l as f32);
                }
            }
            m
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::linspace;
    use candle_core::Device;

    #[test]
    fn test_expected_values() -> Result<()> {
        let support = linspace(-1.0, 1.0, 3, &Device::Cpu)?;
        let probs = [[0.2f32, 0.3, 0.5], [0.6, 0.3, 0.1]];
        let logits = Tensor::new(&probs, &Device::Cpu)?.log()?.unsqueeze(0)?;
        let q: Vec<Vec<f32>> = expected_values(&logits, &support)?.to_vec2()?;
        assert!((q[0][0] - 0.3).abs() < 1e-5);
        assert!((q[0][1] + 0.5).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_project_preserves_mass() {
        let p = vec![vec![0.1, 0.2, 0.3, 0.2, 0.2]];
        let m = project(&p, &[0.3], &[1.0], 0.9, -2.0, 2.0);
        let total: f32 = m[0].iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_project_terminal() {
        // All mass moves to the atom at the reward.
        let p = vec![vec![0.2; 5]];
        let m = project(&p, &[1.0], &[0.0], 0.99, -2.0, 2.0);
        assert_eq!(m[0], vec![0.0, 0.0, 0.0, 1.0, 0.0]);

        // Between atoms the mass is split linearly.
        let m = project(&p, &[0.25], &[0.0], 0.99, -2.0, 2.0);
        assert!((m[0][2] - 0.75).abs() < 1e-5);
        assert!((m[0][3] - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_project_clamps_to_support() {
        let p = vec![vec![0.5, 0.0, 0.5]];
        let m = project(&p, &[10.0], &[1.0], 1.0, -1.0, 1.0);
        assert_eq!(m[0], vec![0.0, 0.0, 1.0]);
    }
}
