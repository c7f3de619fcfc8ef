//! Core interfaces: environments, agents, experience memories and the data passed
//! between them.
mod agent;
mod batch;
mod env;
mod memory;
mod step;
pub use agent::Agent;
pub use batch::TransitionBatch;
pub use env::{EnvSizes, Env, StateSize};
pub use memory::ExperienceMemory;
pub use step::{Act, RecurrentState, Step, Transition};
