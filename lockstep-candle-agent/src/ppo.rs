//! PPO agent.
//!
//! Actor and critic are separate networks with their own optimizers. The actor has
//! one categorical head per discrete action and a Gaussian head per continuous
//! action, and may carry an LSTM.
mod actor;
mod base;
mod buffer;
mod config;
mod critic;
mod gae;
mod loss;
pub use actor::{Actor, ActorConfig, ActorOutput};
pub use base::Ppo;
pub use buffer::RolloutBuffer;
pub use config::PpoConfig;
pub use critic::{Critic, CriticConfig};
pub use gae::{gae, normalize};
pub use loss::{clipped_surrogate, total_loss, value_loss};
