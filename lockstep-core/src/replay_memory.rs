//! Experience memory with uniform or prioritized sampling.
//!
//! [`ReplayMemory`] is a FIFO ring of [`Transition`](crate::Transition)s. When built
//! with a [`PerConfig`], it additionally keeps a sum tree of priorities and samples
//! proportionally to `p_i^alpha`, returning importance weights
//! `w_i = (N * P(i))^(-beta)` normalized by their maximum.
mod base;
mod config;
pub use base::{IwScheduler, ReplayMemory, WeightNormalizer};
pub use config::{PerConfig, ReplayMemoryConfig};
