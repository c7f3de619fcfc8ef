//! Batch of transitions.
use super::Transition;
use crate::error::LockstepError;
use anyhow::Result;

/// Transitions sampled from an [`ExperienceMemory`](crate::ExperienceMemory).
///
/// The accessors flatten the batch row-major, ready to be turned into tensors
/// of shape `[batch_size, dim]`.
#[derive(Clone, Debug)]
pub struct TransitionBatch {
    /// Sampled transitions.
    pub transitions: Vec<Transition>,

    /// Indices of the samples in the memory.
    pub ixs: Vec<usize>,

    /// Normalized importance weights, for prioritized sampling only.
    pub weights: Option<Vec<f32>>,
}

impl TransitionBatch {
    /// Number of transitions.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Returns `true` if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Checks that every transition agrees with the given dimensions.
    pub fn check_shapes(&self, state_dim: usize, n_discrete: usize, n_continuous: usize) -> Result<()> {
        for (i, t) in self.transitions.iter().enumerate() {
            if t.state.len() != state_dim || t.next_state.len() != state_dim {
                return Err(LockstepError::BatchShape(format!(
                    "transition {}: state dim {} / {}, expected {}",
                    i,
                    t.state.len(),
                    t.next_state.len(),
                    state_dim
                ))
                .into());
            }
            if t.act.discrete.len() != n_discrete || t.act.continuous.len() != n_continuous {
                return Err(LockstepError::BatchShape(format!(
                    "transition {}: {} discrete / {} continuous heads, expected {} / {}",
                    i,
                    t.act.discrete.len(),
                    t.act.continuous.len(),
                    n_discrete,
                    n_continuous
                ))
                .into());
            }
        }
        if let Some(ws) = &self.weights {
            if ws.len() != self.len() {
                return Err(LockstepError::BatchShape(format!(
                    "{} weights for {} transitions",
                    ws.len(),
                    self.len()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// States, flattened.
    pub fn states(&self) -> Vec<f32> {
        self.transitions.iter().flat_map(|t| t.state.iter().copied()).collect()
    }

    /// Next states, flattened.
    pub fn next_states(&self) -> Vec<f32> {
        self.transitions
            .iter()
            .flat_map(|t| t.next_state.iter().copied())
            .collect()
    }

    /// Rewards.
    pub fn rewards(&self) -> Vec<f32> {
        self.transitions.iter().map(|t| t.reward).collect()
    }

    /// `1 - done` for each transition.
    pub fn not_dones(&self) -> Vec<f32> {
        self.transitions
            .iter()
            .map(|t| if t.is_done { 0.0 } else { 1.0 })
            .collect()
    }

    /// Discrete actions, flattened to `[batch_size, n_discrete]`.
    pub fn discrete_actions(&self) -> Vec<u32> {
        self.transitions
            .iter()
            .flat_map(|t| t.act.discrete.iter().map(|&a| a as u32))
            .collect()
    }

    /// Continuous actions, flattened to `[batch_size, n_continuous]`.
    pub fn continuous_actions(&self) -> Vec<f32> {
        self.transitions
            .iter()
            .flat_map(|t| t.act.continuous.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Act;

    fn batch() -> TransitionBatch {
        TransitionBatch {
            transitions: vec![
                Transition::new(vec![0.0, 1.0], Act::discrete(vec![1]), 1.0, vec![1.0, 2.0], false),
                Transition::new(vec![2.0, 3.0], Act::discrete(vec![0]), -1.0, vec![3.0, 4.0], true),
            ],
            ixs: vec![3, 7],
            weights: None,
        }
    }

    #[test]
    fn test_flatten() {
        let b = batch();
        assert_eq!(b.states(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(b.next_states(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(b.not_dones(), vec![1.0, 0.0]);
        assert_eq!(b.discrete_actions(), vec![1, 0]);
        assert!(b.continuous_actions().is_empty());
    }

    #[test]
    fn test_check_shapes() {
        let b = batch();
        assert!(b.check_shapes(2, 1, 0).is_ok());
        let err = b.check_shapes(3, 1, 0).unwrap_err();
        assert!(err.downcast_ref::<LockstepError>().unwrap().is_data());
        assert!(b.check_shapes(2, 2, 0).is_err());
    }
}
