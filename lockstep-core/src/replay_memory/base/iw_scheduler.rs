//! Annealing of the importance-weight exponent.
use serde::{Deserialize, Serialize};

/// Linearly anneals `beta` from `beta_0` to `beta_final` over `n_opts_final`
/// priority updates.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct IwScheduler {
    beta_0: f32,
    beta_final: f32,
    n_opts_final: usize,
    n_opts: usize,
}

impl IwScheduler {
    /// Creates a scheduler.
    pub fn new(beta_0: f32, beta_final: f32, n_opts_final: usize) -> Self {
        Self {
            beta_0,
            beta_final,
            n_opts_final,
            n_opts: 0,
        }
    }

    /// Current exponent.
    pub fn beta(&self) -> f32 {
        if self.n_opts >= self.n_opts_final {
            self.beta_final
        } else {
            let frac = self.n_opts as f32 / self.n_opts_final as f32;
            self.beta_0 + (self.beta_final - self.beta_0) * frac
        }
    }

    /// Advances the schedule by one priority update.
    pub fn add_n_opts(&mut self) {
        self.n_opts += 1;
    }
}

#[test]
fn test_iw_scheduler() {
    let mut s = IwScheduler::new(0.4, 1.0, 3);
    assert_eq!(s.beta(), 0.4);
    s.add_n_opts();
    assert!((s.beta() - 0.6).abs() < 1e-6);
    (0..5).for_each(|_| s.add_n_opts());
    assert_eq!(s.beta(), 1.0);
}
