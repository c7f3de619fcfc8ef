//! Experience memory interface.
use super::{Transition, TransitionBatch};
use anyhow::Result;

/// Bounded storage of transitions.
///
/// Implementations keep `len() <= capacity()` and evict the oldest transition when
/// full.
pub trait ExperienceMemory {
    /// Configuration the memory is built from.
    type Config: Clone;

    /// Builds an empty memory.
    fn build(config: &Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Stores transitions in the given order.
    fn push(&mut self, transitions: Vec<Transition>) -> Result<()>;

    /// Samples a batch.
    ///
    /// Fails with [`LockstepError::InsufficientData`] if `batch_size` exceeds
    /// [`ExperienceMemory::len`].
    ///
    /// [`LockstepError::InsufficientData`]: crate::error::LockstepError::InsufficientData
    fn sample(&mut self, batch_size: usize) -> Result<TransitionBatch>;

    /// Writes back priorities of sampled transitions.
    ///
    /// `ixs` are the indices returned in [`TransitionBatch::ixs`]. Memories without
    /// priorities ignore the call.
    fn update_priorities(&mut self, ixs: &[usize], priorities: &[f32]) -> Result<()>;

    /// Number of stored transitions.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of stored transitions.
    fn capacity(&self) -> usize;

    /// Removes all transitions.
    fn clear(&mut self);

    /// Stored transitions, oldest first.
    fn transitions(&self) -> Vec<&Transition>;

    /// Number of stored transitions that end an episode.
    fn num_episodes(&self) -> usize {
        self.transitions().iter().filter(|t| t.is_done).count()
    }
}
