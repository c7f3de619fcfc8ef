#![warn(missing_docs)]
//! Core of lockstep, a reinforcement learning engine for simulations that advance
//! several environments in lockstep.
//!
//! This crate is independent of any tensor backend. It defines
//!
//! * the interfaces between environments, agents and experience memories
//!   ([`Env`], [`Agent`], [`ExperienceMemory`]),
//! * [`replay_memory::ReplayMemory`], a ring buffer with uniform or prioritized sampling,
//! * [`rollout::RolloutCoordinator`], which drives environments with action pooling.
//!
//! Agents backed by neural networks live in `lockstep-candle-agent`.
pub mod error;
pub mod record;
pub mod replay_memory;
pub mod rollout;

mod base;
pub use base::{
    Act, Agent, Env, EnvSizes, ExperienceMemory, RecurrentState, StateSize, Step, Transition,
    TransitionBatch,
};
