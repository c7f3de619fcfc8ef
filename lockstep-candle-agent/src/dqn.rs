//! DQN agent.
//!
//! One network family covers the variants: epsilon-greedy on action values, noisy
//! heads, categorical (C51) value distributions and noisy categorical heads. Any of
//! them can be combined with a dueling head and prioritized replay.
mod base;
mod categorical;
mod config;
mod explorer;
mod qnet;
pub use base::Dqn;
pub use categorical::{expected_values, project};
pub use config::DqnConfig;
pub use explorer::{ActionSelection, EpsilonSchedule};
pub use qnet::{QNet, QNetConfig};
