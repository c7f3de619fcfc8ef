//! Exploration strategies of DQN.
use super::{categorical::expected_values, qnet::QNet};
use anyhow::Result;
use candle_core::{Tensor, D};
use lockstep_core::Act;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponentially decaying epsilon.
///
/// `eps = eps_end + (eps_start - eps_end) * exp(-episode_count / eps_decay)`.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EpsilonSchedule {
    /// Epsilon at episode 0.
    pub eps_start: f64,

    /// Asymptotic epsilon.
    pub eps_end: f64,

    /// Decay constant in episodes.
    pub eps_decay: f64,
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        Self {
            eps_start: 1.0,
            eps_end: 0.005,
            eps_decay: 80.0,
        }
    }
}

impl EpsilonSchedule {
    /// Epsilon after `episode_count` finished episodes.
    pub fn eps(&self, episode_count: usize) -> f64 {
        self.eps_end
            + (self.eps_start - self.eps_end) * (-(episode_count as f64) / self.eps_decay).exp()
    }
}

/// Action selection of [`Dqn`](super::Dqn), fixed when the agent is built.
pub enum ActionSelection {
    /// Epsilon-greedy on action values.
    Vanilla(EpsilonSchedule),

    /// Greedy on action values under parameter noise.
    Noisy,

    /// Greedy on the expectations of value distributions over `support`.
    Categorical(Tensor),

    /// [`ActionSelection::Categorical`] under parameter noise.
    CategoricalNoisy(Tensor),
}

impl ActionSelection {
    /// Epsilon at `episode_count`, for epsilon-greedy selection only.
    pub fn eps(&self, episode_count: usize) -> Option<f64> {
        match self {
            Self::Vanilla(schedule) => Some(schedule.eps(episode_count)),
            _ => None,
        }
    }

    fn is_noisy(&self) -> bool {
        matches!(self, Self::Noisy | Self::CategoricalNoisy(_))
    }

    fn support(&self) -> Option<&Tensor> {
        match self {
            Self::Categorical(s) | Self::CategoricalNoisy(s) => Some(s),
            _ => None,
        }
    }

    // Greedy actions of `[batch, ...]` states, one row per state.
    fn greedy(&self, qnet: &QNet, states: &Tensor, noisy: bool) -> Result<Vec<Vec<usize>>> {
        let outs = qnet.forward_with(states, noisy)?;
        let mut acts = vec![vec![]; states.dim(0)?];
        for out in outs.iter() {
            let q = match self.support() {
                Some(support) => expected_values(out, support)?,
                None => out.clone(),
            };
            let best: Vec<u32> = q.detach().argmax(D::Minus1)?.to_vec1()?;
            for (act, a) in acts.iter_mut().zip(best) {
                act.push(a as usize);
            }
        }
        Ok(acts)
    }

    /// Selects one action per row of `states`.
    ///
    /// Noisy variants in training mode draw fresh noise for every state, and
    /// epsilon-greedy draws are made per state as well.
    pub fn select(
        &self,
        qnet: &mut QNet,
        states: &Tensor,
        action_sizes: &[usize],
        episode_count: usize,
        is_training: bool,
        rng: &mut impl Rng,
    ) -> Result<Vec<Act>> {
        let acts = if is_training && self.is_noisy() {
            let mut acts = Vec::with_capacity(states.dim(0)?);
            for i in 0..states.dim(0)? {
                qnet.reset_noise(rng)?;
                let state = states.get(i)?.unsqueeze(0)?;
                acts.extend(self.greedy(qnet, &state, true)?);
            }
            acts
        } else {
            self.greedy(qnet, states, false)?
        };

        let acts: Vec<Vec<usize>> = match (self, is_training) {
            (Self::Vanilla(schedule), true) => {
                let eps = schedule.eps(episode_count);
                acts.into_iter()
                    .map(|act| match rng.gen::<f64>() < eps {
                        true => action_sizes.iter().map(|&n| rng.gen_range(0..n)).collect(),
                        false => act,
                    })
                    .collect()
            }
            _ => acts,
        };

        Ok(acts.into_iter().map(Act::discrete).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_epsilon_schedule() {
        let schedule = EpsilonSchedule {
            eps_start: 0.9,
            eps_end: 0.05,
            eps_decay: 200.0,
        };
        assert!((schedule.eps(0) - 0.9).abs() < 1e-12);
        let mut prev = schedule.eps(0);
        for n in [1, 10, 100, 1000] {
            let eps = schedule.eps(n);
            let expected = 0.05 + 0.85 * (-(n as f64) / 200.0).exp();
            assert!((eps - expected).abs() < 1e-12);
            assert!(eps < prev);
            assert!(eps > 0.05);
            prev = eps;
        }
    }
}
