//! One-shot agent construction off the calling thread.
use anyhow::{anyhow, Result};
use log::info;
use std::thread::{self, JoinHandle};

/// An agent being constructed on a background thread.
///
/// [`AgentInit::wait`] is the barrier: it blocks until construction finishes and
/// hands over the agent, or the error construction failed with.
pub struct AgentInit<A> {
    handle: JoinHandle<Result<A>>,
}

impl<A: Send + 'static> AgentInit<A> {
    /// Starts building an agent with `f`.
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<A> + Send + 'static,
    {
        let handle = thread::spawn(move || {
            let agent = f();
            info!("Agent construction finished");
            agent
        });
        Self { handle }
    }

    /// Returns `true` if construction has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the agent is built.
    pub fn wait(self) -> Result<A> {
        self.handle
            .join()
            .map_err(|_| anyhow!("agent construction panicked"))?
    }
}
