//! Sum tree for prioritized sampling.
use crate::error::LockstepError;
use anyhow::Result;
use rand::Rng;
use segment_tree::{
    ops::{MaxIgnoreNaN, MinIgnoreNaN},
    SegmentPoint,
};
use serde::{Deserialize, Serialize};

// Draws landing on an unused or zero leaf before falling back to a scan.
const MAX_RETRIES: usize = 32;

/// How importance weights are normalized.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum WeightNormalizer {
    /// Divide by the largest weight of any stored transition.
    All,

    /// Divide by the largest weight in the sampled batch.
    Batch,
}

/// Binary tree whose leaves are `p_i^alpha` and whose inner nodes hold the sums
/// of their subtrees.
#[derive(Debug)]
pub struct SumTree {
    eps: f32,
    alpha: f32,
    capacity: usize,
    n_samples: usize,
    tree: Vec<f32>,
    // Minimum of the leaves, i.e. the largest importance weight.
    min_tree: SegmentPoint<f32, MinIgnoreNaN>,
    // Raw priorities, for assigning the maximum to new transitions.
    max_tree: SegmentPoint<f32, MaxIgnoreNaN>,
    normalize: WeightNormalizer,
}

impl SumTree {
    pub fn new(capacity: usize, alpha: f32, eps: f32, normalize: WeightNormalizer) -> Self {
        Self {
            eps,
            alpha,
            capacity,
            n_samples: 0,
            tree: vec![0f32; 2 * capacity - 1],
            min_tree: SegmentPoint::build(vec![f32::MAX; capacity], MinIgnoreNaN),
            max_tree: SegmentPoint::build(vec![0f32; capacity], MaxIgnoreNaN),
            normalize,
        }
    }

    fn propagate(&mut self, mut ix: usize, change: f32) {
        while ix != 0 {
            ix = (ix - 1) / 2;
            self.tree[ix] += change;
        }
    }

    fn retrieve(&self, mut ix: usize, mut s: f32) -> usize {
        loop {
            let left = 2 * ix + 1;
            let right = left + 1;
            if left >= self.tree.len() {
                return ix;
            }
            if s <= self.tree[left] || self.tree[right] == 0f32 {
                ix = left;
            } else {
                s -= self.tree[left];
                ix = right;
            }
        }
    }

    /// Sum of `p_i^alpha` over the stored transitions.
    pub fn total(&self) -> f32 {
        self.tree[0]
    }

    /// Largest raw priority, `1` for an empty tree.
    pub fn max(&self) -> f32 {
        if self.n_samples == 0 {
            return 1.0;
        }
        let max = self.max_tree.query(0, self.n_samples);
        if max > 0.0 {
            max
        } else {
            1.0
        }
    }

    /// Sets the priority of a newly stored transition at `ix`.
    pub fn add(&mut self, ix: usize, p: f32) {
        debug_assert!(ix <= self.n_samples);
        self.update(ix, p);
        if self.n_samples < self.capacity && ix == self.n_samples {
            self.n_samples += 1;
        }
    }

    /// Updates the priority at `ix`; the stored leaf is `(p + eps)^alpha`.
    pub fn update(&mut self, ix: usize, p: f32) {
        debug_assert!(ix < self.capacity);
        let p = p.abs();
        let leaf = (p + self.eps).powf(self.alpha);
        self.min_tree.modify(ix, leaf);
        self.max_tree.modify(ix, p);
        let ix = ix + self.capacity - 1;
        let change = leaf - self.tree[ix];
        self.tree[ix] = leaf;
        self.propagate(ix, change);
    }

    /// Index of the leaf where the cumulative sum of priorities reaches `s`.
    pub fn get(&self, s: f32) -> usize {
        let ix = self.retrieve(0, s);
        debug_assert!(ix >= (self.capacity - 1));
        ix + 1 - self.capacity
    }

    /// Probability of sampling `ix`.
    pub fn prob(&self, ix: usize) -> f32 {
        self.tree[ix + self.capacity - 1] / self.total()
    }

    fn leaf(&self, ix: usize) -> f32 {
        self.tree[ix + self.capacity - 1]
    }

    // Float drift in the inner sums can land on an unused leaf; after a few misses the
    // last used leaf with positive priority is taken.
    fn draw(&self, p_sum: f32, rng: &mut impl Rng) -> Option<usize> {
        (0..MAX_RETRIES)
            .find_map(|_| {
                let ix = self.get(p_sum * rng.gen::<f32>());
                (ix < self.n_samples && self.leaf(ix) > 0.0).then_some(ix)
            })
            .or_else(|| (0..self.n_samples).rev().find(|&ix| self.leaf(ix) > 0.0))
    }

    /// Samples indices proportionally to priority and returns normalized importance
    /// weights `(N * P(i))^(-beta) / max_j w_j`.
    ///
    /// Fails with [`LockstepError::Numerical`] if no stored transition has a positive
    /// priority.
    pub fn sample(
        &self,
        batch_size: usize,
        beta: f32,
        rng: &mut impl Rng,
    ) -> Result<(Vec<usize>, Vec<f32>)> {
        let p_sum = self.total();
        let all_zero = || {
            LockstepError::Numerical(format!(
                "priorities of {} transitions sum to {}",
                self.n_samples, p_sum
            ))
        };
        if !(p_sum > 0.0) {
            return Err(all_zero().into());
        }
        let ixs = (0..batch_size)
            .map(|_| self.draw(p_sum, rng).ok_or_else(all_zero))
            .collect::<Result<Vec<_>, _>>()?;

        let n = self.n_samples as f32;
        let ws = ixs
            .iter()
            .map(|&ix| (n * self.prob(ix)).powf(-beta))
            .collect::<Vec<_>>();

        let w_max = match self.normalize {
            WeightNormalizer::All => {
                let p_min = self.min_tree.query(0, self.n_samples) / p_sum;
                (n * p_min).powf(-beta)
            }
            WeightNormalizer::Batch => ws.iter().fold(f32::MIN, |m, &w| w.max(m)),
        };
        let ws = ws.iter().map(|w| w / w_max).collect();

        Ok((ixs, ws))
    }
}
