//! Lockstep rollouts over several environments.
//!
//! [`RolloutCoordinator`] accumulates the time passed to [`RolloutCoordinator::tick`]
//! and advances all environments by one simulation step per `step_interval`.
//! Only one in `pooling_rate` steps queries the agent (a real step); the others are
//! ghost steps in which every environment keeps applying its previous action.
mod base;
mod config;
mod init;
pub use base::{EpisodeStats, RolloutCoordinator, RolloutState, TickReport};
pub use config::RolloutConfig;
pub use init::AgentInit;
