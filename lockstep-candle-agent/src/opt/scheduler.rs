use serde::{Deserialize, Serialize};

/// Configuration of [`CyclicLr`].
///
/// Bounds are given relative to the learning rate of the optimizer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CyclicLrConfig {
    /// Lower bound as a multiple of the learning rate.
    pub base_lr_ratio: f64,

    /// Upper bound as a multiple of the learning rate.
    pub max_lr_ratio: f64,

    /// Steps from the lower to the upper bound.
    pub step_size_up: usize,

    /// Steps from the upper to the lower bound.
    pub step_size_down: usize,
}

impl Default for CyclicLrConfig {
    fn default() -> Self {
        Self {
            base_lr_ratio: 0.5,
            max_lr_ratio: 2.0,
            step_size_up: 500,
            step_size_down: 2000,
        }
    }
}

impl CyclicLrConfig {
    /// Builds a scheduler around learning rate `lr`.
    pub fn build(&self, lr: f64) -> CyclicLr {
        CyclicLr {
            base_lr: lr * self.base_lr_ratio,
            max_lr: lr * self.max_lr_ratio,
            step_size_up: self.step_size_up.max(1),
            step_size_down: self.step_size_down.max(1),
            n_steps: 0,
        }
    }
}

/// Triangular cyclic learning rate.
///
/// Starts at the lower bound, rises linearly to the upper bound in `step_size_up`
/// steps and falls back in `step_size_down` steps.
#[derive(Debug, Clone)]
pub struct CyclicLr {
    base_lr: f64,
    max_lr: f64,
    step_size_up: usize,
    step_size_down: usize,
    n_steps: usize,
}

impl CyclicLr {
    /// Learning rate at the current step.
    pub fn lr(&self) -> f64 {
        let x = self.n_steps % (self.step_size_up + self.step_size_down);
        let amplitude = self.max_lr - self.base_lr;
        if x < self.step_size_up {
            self.base_lr + amplitude * x as f64 / self.step_size_up as f64
        } else {
            let x = x - self.step_size_up;
            self.max_lr - amplitude * x as f64 / self.step_size_down as f64
        }
    }

    /// Advances one step and returns the new learning rate.
    pub fn step(&mut self) -> f64 {
        self.n_steps += 1;
        self.lr()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_triangular_cycle() {
        let config = CyclicLrConfig {
            step_size_up: 2,
            step_size_down: 4,
            ..Default::default()
        };
        let mut s = config.build(1.0);
        let mut lrs = vec![s.lr()];
        for _ in 0..6 {
            lrs.push(s.step());
        }
        let expected = [0.5, 1.25, 2.0, 1.625, 1.25, 0.875, 0.5];
        for (lr, e) in lrs.iter().zip(expected.iter()) {
            assert!((lr - e).abs() < 1e-9, "{:?}", lrs);
        }
    }
}
