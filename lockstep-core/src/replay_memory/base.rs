//! Ring buffer of transitions with optional prioritized sampling.
mod iw_scheduler;
mod sum_tree;
use super::{PerConfig, ReplayMemoryConfig};
use crate::{error::LockstepError, ExperienceMemory, Transition, TransitionBatch};
use anyhow::Result;
pub use iw_scheduler::IwScheduler;
use rand::{rngs::StdRng, SeedableRng};
use sum_tree::SumTree;
pub use sum_tree::WeightNormalizer;

struct PerState {
    sum_tree: SumTree,
    iw_scheduler: IwScheduler,
}

impl PerState {
    fn new(capacity: usize, per_config: &PerConfig) -> Self {
        Self {
            sum_tree: SumTree::new(
                capacity,
                per_config.alpha,
                per_config.eps,
                per_config.normalize,
            ),
            iw_scheduler: IwScheduler::new(
                per_config.beta_0,
                per_config.beta_final,
                per_config.n_opts_final,
            ),
        }
    }
}

/// FIFO ring of transitions.
///
/// Sampling is uniform without replacement unless the memory was configured with
/// [`PerConfig`], in which case it is proportional to `p_i^alpha` (with replacement)
/// and the batch carries importance weights.
pub struct ReplayMemory {
    config: ReplayMemoryConfig,

    // Next slot to write.
    i: usize,
    buffer: Vec<Transition>,
    rng: StdRng,
    per_state: Option<PerState>,
}

impl ReplayMemory {
    /// Returns `true` if sampling is prioritized.
    pub fn is_prioritized(&self) -> bool {
        self.per_state.is_some()
    }

    /// Current exponent of importance weights, for prioritized sampling only.
    pub fn beta(&self) -> Option<f32> {
        self.per_state.as_ref().map(|s| s.iw_scheduler.beta())
    }

    /// Sampling probability of the transition at `ix`.
    pub fn prob(&self, ix: usize) -> f32 {
        match &self.per_state {
            Some(s) => s.sum_tree.prob(ix),
            None => 1.0 / self.buffer.len() as f32,
        }
    }

    fn insufficient(&self, requested: usize) -> anyhow::Error {
        LockstepError::InsufficientData {
            requested,
            available: self.buffer.len(),
        }
        .into()
    }
}

impl ExperienceMemory for ReplayMemory {
    type Config = ReplayMemoryConfig;

    fn build(config: &Self::Config) -> Result<Self> {
        if config.capacity == 0 {
            return Err(LockstepError::config("memory capacity must be positive").into());
        }
        if let Some(per_config) = &config.per_config {
            per_config.validate()?;
        }
        let per_state = config
            .per_config
            .as_ref()
            .map(|per_config| PerState::new(config.capacity, per_config));

        Ok(Self {
            config: config.clone(),
            i: 0,
            buffer: Vec::with_capacity(config.capacity),
            rng: StdRng::seed_from_u64(config.seed),
            per_state,
        })
    }

    fn push(&mut self, transitions: Vec<Transition>) -> Result<()> {
        let capacity = self.config.capacity;
        for tr in transitions {
            if self.buffer.len() < capacity {
                self.buffer.push(tr);
            } else {
                self.buffer[self.i] = tr;
            }
            if let Some(per_state) = &mut self.per_state {
                let max_p = per_state.sum_tree.max();
                per_state.sum_tree.add(self.i, max_p);
            }
            self.i = (self.i + 1) % capacity;
        }
        Ok(())
    }

    fn sample(&mut self, batch_size: usize) -> Result<TransitionBatch> {
        if batch_size > self.buffer.len() || self.buffer.is_empty() {
            return Err(self.insufficient(batch_size));
        }

        let (ixs, weights) = match &self.per_state {
            Some(per_state) => {
                let beta = per_state.iw_scheduler.beta();
                let (ixs, ws) = per_state.sum_tree.sample(batch_size, beta, &mut self.rng)?;
                (ixs, Some(ws))
            }
            None => {
                let ixs = rand::seq::index::sample(&mut self.rng, self.buffer.len(), batch_size)
                    .into_vec();
                (ixs, None)
            }
        };

        Ok(TransitionBatch {
            transitions: ixs.iter().map(|&ix| self.buffer[ix].clone()).collect(),
            ixs,
            weights,
        })
    }

    fn update_priorities(&mut self, ixs: &[usize], priorities: &[f32]) -> Result<()> {
        let size = self.buffer.len();
        if let Some(per_state) = &mut self.per_state {
            if ixs.len() != priorities.len() {
                return Err(LockstepError::BatchShape(format!(
                    "{} indices for {} priorities",
                    ixs.len(),
                    priorities.len()
                ))
                .into());
            }
            if let Some(&ix) = ixs.iter().find(|&&ix| ix >= size) {
                return Err(LockstepError::BatchShape(format!(
                    "index {} out of range for {} transitions",
                    ix, size
                ))
                .into());
            }
            for (&ix, &p) in ixs.iter().zip(priorities.iter()) {
                per_state.sum_tree.update(ix, p);
            }
            per_state.iw_scheduler.add_n_opts();
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn capacity(&self) -> usize {
        self.config.capacity
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.i = 0;
        if let Some(per_config) = &self.config.per_config {
            self.per_state = Some(PerState::new(self.config.capacity, per_config));
        }
    }

    fn transitions(&self) -> Vec<&Transition> {
        if self.buffer.len() < self.config.capacity {
            self.buffer.iter().collect()
        } else {
            self.buffer[self.i..]
                .iter()
                .chain(self.buffer[..self.i].iter())
                .collect()
        }
    }
}
