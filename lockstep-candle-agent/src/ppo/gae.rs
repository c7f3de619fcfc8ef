//! Generalized advantage estimation.

/// Computes advantages and returns of consecutive transitions.
///
/// `next_values[t]` is `V(s_{t+1})` of transition `t`, so episodes stored back to
/// back need no separate bootstrap value. The recursion is cut at every `done`:
///
/// * `δ_t = r_t + γ V(s_{t+1}) (1 - done_t) - V(s_t)`
/// * `A_t = δ_t + γ λ A_{t+1} (1 - done_t)`
///
/// Returns are `A_t + V(s_t)`.
pub fn gae(
    rewards: &[f32],
    values: &[f32],
    next_values: &[f32],
    dones: &[bool],
    gamma: f32,
    lambda: f32,
) -> (Vec<f32>, Vec<f32>) {
    let n = rewards.len();
    let mut advantages = vec![0f32; n];
    let mut returns = vec![0f32; n];
    let mut acc = 0f32;

    for t in (0..n).rev() {
        let not_done = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * next_values[t] * not_done - values[t];
        acc = delta + gamma * lambda * not_done * acc;
        advantages[t] = acc;
        returns[t] = acc + values[t];
    }

    (advantages, returns)
}

/// Shifts and scales `xs` to zero mean and unit variance.
///
/// A single element is only centered.
pub fn normalize(xs: &mut [f32]) {
    if xs.is_empty() {
        return;
    }
    let n = xs.len() as f32;
    let mean = xs.iter().sum::<f32>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
    let std = if xs.len() > 1 { var.sqrt() + 1e-8 } else { 1.0 };
    for x in xs.iter_mut() {
        *x = (*x - mean) / std;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // Σ_k (γλ)^k δ_{t+k}, stopping after the first terminal transition.
    fn brute_force(
        rewards: &[f32],
        values: &[f32],
        next_values: &[f32],
        dones: &[bool],
        gamma: f32,
        lambda: f32,
    ) -> Vec<f32> {
        let delta = |t: usize| {
            let not_done = if dones[t] { 0.0 } else { 1.0 };
            rewards[t] + gamma * next_values[t] * not_done - values[t]
        };
        (0..rewards.len())
            .map(|t| {
                let mut sum = 0.0;
                let mut coef = 1.0;
                for k in t..rewards.len() {
                    sum += coef * delta(k);
                    if dones[k] {
                        break;
                    }
                    coef *= gamma * lambda;
                }
                sum
            })
            .collect()
    }

    #[test]
    fn test_gae_matches_brute_force() {
        let rewards = [1.0, 0.5, -0.2, 2.0, 0.0, 1.5, 0.3];
        let values = [0.3, 0.1, 0.7, -0.4, 0.2, 0.9, 0.5];
        let next_values = [0.1, 0.7, -0.4, 0.6, 0.9, 0.5, 0.8];
        let dones = [false, false, false, true, false, false, true];

        let (adv, ret) = gae(&rewards, &values, &next_values, &dones, 0.99, 0.95);
        let expected = brute_force(&rewards, &values, &next_values, &dones, 0.99, 0.95);
        for t in 0..rewards.len() {
            assert!((adv[t] - expected[t]).abs() < 1e-5, "t = {}", t);
            assert!((ret[t] - adv[t] - values[t]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_gae_truncated_rollout() {
        // Without a terminal flag the last step bootstraps from its next value.
        let (adv, _) = gae(&[1.0], &[0.5], &[2.0], &[false], 0.9, 0.95);
        assert!((adv[0] - (1.0 + 0.9 * 2.0 - 0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let mut xs = vec![1.0, 2.0, 3.0, 4.0];
        normalize(&mut xs);
        let mean = xs.iter().sum::<f32>() / 4.0;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-4);

        let mut xs = vec![3.0];
        normalize(&mut xs);
        assert_eq!(xs, vec![0.0]);
    }
}
