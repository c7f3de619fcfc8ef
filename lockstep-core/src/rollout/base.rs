use super::{AgentInit, RolloutConfig};
use crate::{
    error::LockstepError, record::Record, Act, Agent, Env, EnvSizes, RecurrentState, Transition,
};
use anyhow::Result;
use log::{debug, info};
use std::mem;

/// State of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutState {
    /// Waiting for the next tick.
    Idle,

    /// Processing a tick.
    Ticking,
}

/// Return and length of a finished episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeStats {
    /// Index of the environment.
    pub env_ix: usize,

    /// Sum of rewards.
    pub episode_return: f32,

    /// Number of decision steps.
    pub episode_length: usize,
}

/// What happened during one call to [`RolloutCoordinator::tick`].
#[derive(Debug, Default)]
pub struct TickReport {
    /// Number of decision steps.
    pub real_steps: usize,

    /// Number of ghost steps.
    pub ghost_steps: usize,

    /// Episodes finished during the tick.
    pub episodes: Vec<EpisodeStats>,

    /// Records of the optimization steps that ran.
    pub records: Vec<Record>,
}

struct EnvSlot<E> {
    env: E,
    state: Vec<f32>,
    held: Option<Act>,
    memory: Option<RecurrentState>,
    episode: Vec<Transition>,
    episode_return: f32,
}

/// Drives environments in lockstep and feeds their transitions to an agent.
///
/// Transitions are buffered per environment and handed to [`Agent::add_transitions`]
/// one whole episode at a time, so that every episode reaches the agent contiguous
/// and terminated by a `done` transition.
pub struct RolloutCoordinator<E, A> {
    config: RolloutConfig,
    slots: Vec<EnvSlot<E>>,
    agent: Option<A>,
    pending: Option<AgentInit<A>>,
    state: RolloutState,
    step_counter: usize,
    accumulated_time: f32,
}

impl<E, A> RolloutCoordinator<E, A>
where
    E: Env,
    A: Agent + Send + 'static,
{
    /// Builds a coordinator around an agent.
    pub fn build(config: RolloutConfig, envs: Vec<E>, agent: A) -> Result<Self> {
        Self::_build(config, envs, Some(agent), None)
    }

    /// Builds a coordinator whose agent is still under construction.
    ///
    /// The first tick that needs the agent blocks until construction finishes.
    pub fn build_with_init(config: RolloutConfig, envs: Vec<E>, init: AgentInit<A>) -> Result<Self> {
        Self::_build(config, envs, None, Some(init))
    }

    fn _build(
        config: RolloutConfig,
        envs: Vec<E>,
        agent: Option<A>,
        pending: Option<AgentInit<A>>,
    ) -> Result<Self> {
        if envs.is_empty() {
            return Err(LockstepError::config("no environments supplied").into());
        }
        if config.pooling_rate == 0 {
            return Err(LockstepError::config("pooling rate must be at least 1").into());
        }
        if !(config.step_interval > 0.0) || !(config.time_scale > 0.0) {
            return Err(LockstepError::config(format!(
                "step interval {} and time scale {} must be positive",
                config.step_interval, config.time_scale
            ))
            .into());
        }

        let sizes = envs[0].sizes();
        sizes.validate()?;
        check_sizes(&sizes, &envs)?;

        let slots = envs
            .into_iter()
            .map(|mut env| {
                let state = env.reset()?;
                Ok(EnvSlot {
                    env,
                    state,
                    held: None,
                    memory: None,
                    episode: vec![],
                    episode_return: 0.0,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Rollout over {} environments with pooling rate {}",
            slots.len(),
            config.pooling_rate
        );

        Ok(Self {
            config,
            slots,
            agent,
            pending,
            state: RolloutState::Idle,
            step_counter: 0,
            accumulated_time: 0.0,
        })
    }

    /// Advances simulated time by `delta` seconds.
    ///
    /// Runs as many steps as fit in the accumulated time. A failing step aborts the
    /// tick with its error.
    pub fn tick(&mut self, delta: f32) -> Result<TickReport> {
        self.state = RolloutState::Ticking;
        let mut report = TickReport::default();
        let result = self.run_steps(delta, &mut report);
        self.state = RolloutState::Idle;
        result.map(|_| report)
    }

    fn run_steps(&mut self, delta: f32, report: &mut TickReport) -> Result<()> {
        self.accumulated_time += delta;
        let interval = self.config.effective_interval();

        while self.accumulated_time >= interval {
            if self.step_counter % self.config.pooling_rate == self.config.pooling_rate - 1 {
                self.real_step(report)?;
                report.real_steps += 1;
            } else {
                self.ghost_step()?;
                report.ghost_steps += 1;
            }
            self.accumulated_time -= interval;
            self.step_counter = (self.step_counter + 1) % self.config.pooling_rate;
        }
        Ok(())
    }

    fn ghost_step(&mut self) -> Result<()> {
        for slot in self.slots.iter_mut() {
            slot.env.ghost_step(slot.held.as_ref())?;
        }
        Ok(())
    }

    fn real_step(&mut self, report: &mut TickReport) -> Result<()> {
        self.wait_agent()?;
        let agent = match self.agent.as_mut() {
            Some(agent) => agent,
            None => return Err(LockstepError::config("no agent available").into()),
        };
        let is_training = self.config.is_training;
        let states = self.slots.iter().map(|s| s.state.clone()).collect::<Vec<_>>();

        let (acts, memories) = if agent.is_recurrent() {
            let memories = self.slots.iter().map(|s| s.memory.clone()).collect::<Vec<_>>();
            let (acts, memories): (Vec<_>, Vec<_>) = agent
                .select_actions_recurrent(&states, &memories, is_training)?
                .into_iter()
                .unzip();
            (acts, memories.into_iter().map(Some).collect())
        } else {
            (agent.select_actions(&states, is_training)?, vec![None; states.len()])
        };
        if acts.len() != self.slots.len() {
            return Err(LockstepError::BatchShape(format!(
                "{} actions for {} environments",
                acts.len(),
                self.slots.len()
            ))
            .into());
        }

        for (env_ix, ((slot, act), memory)) in self
            .slots
            .iter_mut()
            .zip(acts.into_iter())
            .zip(memories.into_iter())
            .enumerate()
        {
            let step = slot.env.step(&act)?;
            let tr = Transition::new(
                mem::take(&mut slot.state),
                act.clone(),
                step.reward,
                step.next_state.clone(),
                step.is_done,
            )
            .recurrent_state(slot.memory.take());
            slot.episode.push(tr);
            slot.episode_return += step.reward;
            slot.held = Some(act);

            if step.is_done {
                let episode = mem::take(&mut slot.episode);
                let stats = EpisodeStats {
                    env_ix,
                    episode_return: slot.episode_return,
                    episode_length: episode.len(),
                };
                info!(
                    "env {}: episode finished, return {:.3}, length {}",
                    env_ix, stats.episode_return, stats.episode_length
                );
                report.episodes.push(stats);
                slot.episode_return = 0.0;
                slot.state = slot.env.reset()?;
                if is_training {
                    agent.add_transitions(episode)?;
                }
            } else {
                slot.state = step.next_state;
                slot.memory = memory;
            }
        }

        if is_training {
            if let Some(record) = agent.optimize()? {
                debug!("Optimization step: {:?}", record);
                report.records.push(record);
            }
        }
        Ok(())
    }

    fn wait_agent(&mut self) -> Result<()> {
        if self.agent.is_none() {
            if let Some(init) = self.pending.take() {
                self.agent = Some(init.wait()?);
            }
        }
        Ok(())
    }

    /// Current state of the coordinator.
    pub fn state(&self) -> RolloutState {
        self.state
    }

    /// Step counter modulo the pooling rate.
    pub fn step_counter(&self) -> usize {
        self.step_counter
    }

    /// Time accumulated but not yet consumed by a step.
    pub fn accumulated_time(&self) -> f32 {
        self.accumulated_time
    }

    /// The configuration.
    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    /// Sets training mode.
    pub fn set_training(&mut self, is_training: bool) {
        self.config.is_training = is_training;
    }

    /// The agent, once constructed.
    pub fn agent(&self) -> Option<&A> {
        self.agent.as_ref()
    }

    /// Mutable access to the agent, waiting for its construction if needed.
    pub fn agent_mut(&mut self) -> Result<Option<&mut A>> {
        self.wait_agent()?;
        Ok(self.agent.as_mut())
    }

    /// The environments.
    pub fn envs(&self) -> impl Iterator<Item = &E> {
        self.slots.iter().map(|s| &s.env)
    }
}

fn check_sizes<E: Env>(sizes: &EnvSizes, envs: &[E]) -> Result<()> {
    for (i, env) in envs.iter().enumerate().skip(1) {
        if &env.sizes() != sizes {
            return Err(LockstepError::config(format!(
                "environment {} has sizes {:?}, expected {:?}",
                i,
                env.sizes(),
                sizes
            ))
            .into());
        }
    }
    Ok(())
}
