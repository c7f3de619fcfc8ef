//! Toy environments for the integration tests.
#![allow(dead_code)]
use anyhow::Result;
use lockstep_core::{
    record::Record,
    rollout::{EpisodeStats, RolloutConfig, RolloutCoordinator},
    Act, Agent, Env, EnvSizes, StateSize, Step,
};

/// Rewards choosing the index of the larger of the first two state values.
///
/// Episodes last `len` decisions.
pub struct ChoiceEnv {
    t: usize,
    len: usize,
    seed: usize,
    grid: bool,
    fixed_reward: Option<f32>,
    pub ghost_steps: usize,
}

impl ChoiceEnv {
    pub fn new(len: usize, seed: usize) -> Self {
        Self {
            t: 0,
            len,
            seed,
            grid: false,
            fixed_reward: None,
            ghost_steps: 0,
        }
    }

    /// States are laid out on a 3x3 grid.
    pub fn grid(mut self) -> Self {
        self.grid = true;
        self
    }

    /// Returns `v` as the reward of every step.
    pub fn fixed_reward(mut self, v: f32) -> Self {
        self.fixed_reward = Some(v);
        self
    }

    fn state(&self) -> Vec<f32> {
        let x = ((self.seed * 7 + self.t * 13) % 17) as f32 / 17.0;
        let mut s = vec![x, 1.0 - x, 0.5, self.t as f32 / self.len as f32];
        if self.grid {
            s.resize(9, 0.0);
        }
        s
    }
}

impl Env for ChoiceEnv {
    fn sizes(&self) -> EnvSizes {
        let state_size = match self.grid {
            true => StateSize::Grid(3, 3),
            false => StateSize::Vector(4),
        };
        EnvSizes::discrete(state_size, vec![2])
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        self.t = 0;
        self.seed += 1;
        Ok(self.state())
    }

    fn step(&mut self, act: &Act) -> Result<Step> {
        let s = self.state();
        let best = if s[0] >= s[1] { 0 } else { 1 };
        let reward = match self.fixed_reward {
            Some(r) => r,
            None if act.discrete[0] == best => 1.0,
            None => 0.0,
        };
        self.t += 1;
        Ok(Step::new(self.state(), reward, self.t >= self.len))
    }

    fn ghost_step(&mut self, _held: Option<&Act>) -> Result<()> {
        self.ghost_steps += 1;
        Ok(())
    }
}

/// Rewards continuous actions close to a target given in the state.
///
/// Optionally carries a discrete head of two actions rewarding the sign of the target.
pub struct TargetEnv {
    t: usize,
    len: usize,
    seed: usize,
    with_discrete: bool,
}

impl TargetEnv {
    pub fn new(len: usize, seed: usize, with_discrete: bool) -> Self {
        Self {
            t: 0,
            len,
            seed,
            with_discrete,
        }
    }

    fn target(&self) -> f32 {
        ((self.seed * 5 + self.t * 3) % 11) as f32 / 5.0 - 1.0
    }

    fn state(&self) -> Vec<f32> {
        vec![self.target(), self.t as f32 / self.len as f32]
    }
}

impl Env for TargetEnv {
    fn sizes(&self) -> EnvSizes {
        let action_sizes = if self.with_discrete { vec![2] } else { vec![] };
        EnvSizes::discrete(StateSize::Vector(2), action_sizes)
            .continuous_bounds(vec![(-1.0, 1.0)])
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        self.t = 0;
        self.seed += 1;
        Ok(self.state())
    }

    fn step(&mut self, act: &Act) -> Result<Step> {
        let target = self.target();
        let mut reward = -(act.continuous[0] - target).powi(2);
        if self.with_discrete {
            let sign = if target >= 0.0 { 1 } else { 0 };
            reward += if act.discrete[0] == sign { 0.5 } else { 0.0 };
        }
        self.t += 1;
        Ok(Step::new(self.state(), reward, self.t >= self.len))
    }

    fn ghost_step(&mut self, _held: Option<&Act>) -> Result<()> {
        Ok(())
    }
}

/// Drives `agent` on `envs` for `n_ticks` decision steps.
pub fn run<E, A>(
    envs: Vec<E>,
    agent: A,
    n_ticks: usize,
) -> Result<(RolloutCoordinator<E, A>, Vec<Record>, Vec<EpisodeStats>)>
where
    E: Env,
    A: Agent + Send + 'static,
{
    let _ = env_logger::builder().is_test(true).try_init();
    let config = RolloutConfig::default().pooling_rate(1);
    let interval = config.effective_interval();
    let mut coordinator = RolloutCoordinator::build(config, envs, agent)?;
    let mut records = vec![];
    let mut episodes = vec![];
    for _ in 0..n_ticks {
        let report = coordinator.tick(interval)?;
        records.extend(report.records);
        episodes.extend(report.episodes);
    }
    Ok((coordinator, records, episodes))
}
