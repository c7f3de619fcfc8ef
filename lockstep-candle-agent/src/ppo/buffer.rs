//! Rollout buffer of PPO.
use lockstep_core::Transition;

/// Transitions collected since the last optimization, in arrival order.
///
/// The buffer never evicts. It is ready once it holds `batch_size` finished episodes
/// or at least `memory_size` transitions, and is then consumed as a whole, so every
/// episode handed to it is trained on exactly once and in one piece.
pub struct RolloutBuffer {
    transitions: Vec<Transition>,
    n_episodes: usize,
    batch_size: usize,
    memory_size: usize,
}

impl RolloutBuffer {
    /// Creates an empty buffer.
    pub fn new(batch_size: usize, memory_size: usize) -> Self {
        Self {
            transitions: Vec::with_capacity(memory_size),
            n_episodes: 0,
            batch_size,
            memory_size,
        }
    }

    /// Appends transitions.
    pub fn push(&mut self, transitions: Vec<Transition>) {
        self.n_episodes += transitions.iter().filter(|t| t.is_done).count();
        self.transitions.extend(transitions);
    }

    /// Returns `true` if an optimization is due.
    pub fn is_ready(&self) -> bool {
        !self.transitions.is_empty()
            && (self.n_episodes >= self.batch_size || self.transitions.len() >= self.memory_size)
    }

    /// Buffered transitions.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Number of buffered transitions.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Number of buffered transitions that end an episode.
    pub fn num_episodes(&self) -> usize {
        self.n_episodes
    }

    /// Removes all transitions.
    pub fn clear(&mut self) {
        self.transitions.clear();
        self.n_episodes = 0;
    }
}
