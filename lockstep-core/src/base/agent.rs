//! Agent.
use super::{Act, RecurrentState, Transition};
use crate::{error::LockstepError, record::Record};
use anyhow::Result;
use std::path::Path;

/// A trainable policy.
///
/// [`Agent::select_actions`], [`Agent::add_transitions`] and [`Agent::optimize`] are
/// everything the rollout coordinator needs; networks, memory and optimizers stay
/// internal to the implementation.
pub trait Agent {
    /// Returns one action per state.
    ///
    /// In training mode the agent explores; otherwise it acts greedily.
    fn select_actions(&mut self, states: &[Vec<f32>], is_training: bool) -> Result<Vec<Act>>;

    /// Returns `true` if the agent threads a recurrent state through its decisions.
    fn is_recurrent(&self) -> bool {
        false
    }

    /// Recurrent counterpart of [`Agent::select_actions`].
    ///
    /// `memories[i]` is the recurrent state of the `i`-th environment, `None` at the
    /// start of an episode. Returns each action with the updated recurrent state.
    fn select_actions_recurrent(
        &mut self,
        _states: &[Vec<f32>],
        _memories: &[Option<RecurrentState>],
        _is_training: bool,
    ) -> Result<Vec<(Act, RecurrentState)>> {
        Err(LockstepError::config(
            "recurrent action selection called on a non-recurrent agent",
        )
        .into())
    }

    /// Stores transitions in the agent's experience memory.
    ///
    /// Every transition with `is_done` counts as a finished episode.
    fn add_transitions(&mut self, transitions: Vec<Transition>) -> Result<()>;

    /// Runs an optimization step if enough experience has been collected.
    ///
    /// Returns `None` if the step was skipped.
    fn optimize(&mut self) -> Result<Option<Record>>;

    /// Number of finished episodes seen by the agent.
    fn episode_count(&self) -> usize;

    /// Saves the parameters of the agent in the given directory.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Loads the parameters of the agent from the given directory.
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
