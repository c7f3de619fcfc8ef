//! PPO agent implemented with candle.
use super::{
    actor::{Actor, ActorOutput},
    buffer::RolloutBuffer,
    config::PpoConfig,
    critic::Critic,
    gae::{gae, normalize},
    loss::{clipped_surrogate, total_loss, value_loss},
};
use crate::{
    model::{split_state, stack_state, RecurrentSubModel, SubModel1},
    opt::OptimizerSet,
    util::{argmax, check_finite, latest_model_path, next_model_path, states_to_tensor},
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{ops::softmax, VarBuilder, VarMap};
use log::{info, trace};
use lockstep_core::{
    error::LockstepError,
    record::{Record, RecordValue},
    Act, Agent, EnvSizes, RecurrentState, Transition, TransitionBatch,
};
use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::SmallRng,
    seq::SliceRandom,
    SeedableRng,
};
use rand_distr::Normal;
use std::{fs, ops::Range, path::Path};

// Contents of the rollout buffer with the targets of the losses.
struct Rollout {
    states: Tensor,
    discrete: Option<Tensor>,
    continuous: Option<Tensor>,
    old_log_probs: Tensor,
    old_values: Tensor,
    advantages: Tensor,
    returns: Tensor,
    episodes: Vec<Range<usize>>,
}

// Losses of a minibatch step.
#[derive(Default)]
struct StepStats {
    loss: f32,
    policy_loss: f32,
    value_loss: f32,
    entropy: f32,
    grad_norm_actor: f32,
    grad_norm_critic: f32,
}

/// Splits consecutive transitions into episodes, each ending at a terminal transition.
///
/// A trailing run without a terminal transition forms the last episode.
fn episodes(transitions: &[Transition]) -> Vec<Range<usize>> {
    let mut episodes = vec![];
    let mut start = 0;
    for (i, t) in transitions.iter().enumerate() {
        if t.is_done {
            episodes.push(start..i + 1);
            start = i + 1;
        }
    }
    if start < transitions.len() {
        episodes.push(start..transitions.len());
    }
    episodes
}

fn select_rows(t: Option<&Tensor>, ix: &Tensor) -> Result<Option<Tensor>> {
    Ok(t.map(|t| t.index_select(ix, 0)).transpose()?)
}

/// PPO agent implemented with candle.
///
/// The agent collects whole episodes and optimizes once [`PpoConfig::batch_size`]
/// of them, or [`PpoConfig::memory_size`] transitions, are in its rollout buffer,
/// which is cleared afterwards.
pub struct Ppo {
    config: PpoConfig,
    sizes: EnvSizes,
    state_dim: usize,
    device: Device,
    varmap_actor: VarMap,
    actor: Actor,
    varmap_critic: VarMap,
    critic: Critic,
    opt_actor: OptimizerSet,
    opt_critic: OptimizerSet,
    memory: RolloutBuffer,
    rng: SmallRng,
    episode_count: usize,
    n_opts: usize,
}

impl Ppo {
    /// Constructs PPO agent for an environment with the given sizes.
    pub fn build(config: PpoConfig, sizes: &EnvSizes) -> Result<Self> {
        config.validate(sizes)?;
        let device = config.device.build()?;

        let varmap_actor = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap_actor, DType::F32, &device);
        let actor = Actor::build(vb.pp("actor"), config.actor_config(sizes))?;

        let varmap_critic = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap_critic, DType::F32, &device);
        let critic = Critic::build(vb.pp("critic"), config.critic_config(sizes))?;

        let opt_actor = Self::build_opt(&config, &varmap_actor)?;
        let opt_critic = Self::build_opt(&config, &varmap_critic)?;
        let memory = RolloutBuffer::new(config.batch_size, config.memory_size);
        info!(
            "PPO agent: {} discrete heads, {} continuous heads, recurrent = {}",
            sizes.action_sizes.len(),
            sizes.n_continuous(),
            config.recurrent
        );

        Ok(Self {
            sizes: sizes.clone(),
            state_dim: sizes.state_size.numel(),
            device,
            varmap_actor,
            actor,
            varmap_critic,
            critic,
            opt_actor,
            opt_critic,
            memory,
            rng: SmallRng::seed_from_u64(config.seed),
            episode_count: 0,
            n_opts: 0,
            config,
        })
    }

    fn build_opt(config: &PpoConfig, varmap: &VarMap) -> Result<OptimizerSet> {
        OptimizerSet::build(
            varmap.all_vars(),
            &config.opt_config,
            config.lr_scheduler.as_ref(),
            config.max_grad_norm,
        )
    }

    /// The rollout buffer.
    pub fn memory(&self) -> &RolloutBuffer {
        &self.memory
    }

    /// Number of optimizations so far.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    fn states_tensor(&self, states: &[Vec<f32>]) -> Result<Tensor> {
        let xs = states_to_tensor(states, &self.device)?;
        if xs.dim(1)? != self.state_dim {
            return Err(LockstepError::BatchShape(format!(
                "states of dim {}, expected {}",
                xs.dim(1)?,
                self.state_dim
            ))
            .into());
        }
        Ok(xs)
    }

    // Draws actions from the distributions in `out`, one state at a time.
    fn sample_actions(&mut self, out: ActorOutput, is_training: bool) -> Result<Vec<Act>> {
        let out = out.detach();
        let probs = out
            .logits
            .iter()
            .map(|l| softmax(l, D::Minus1)?.to_vec2::<f32>())
            .collect::<candle_core::Result<Vec<_>>>()?;
        let mean: Option<Vec<Vec<f32>>> = out.mean.map(|t| t.to_vec2()).transpose()?;
        let log_std: Option<Vec<Vec<f32>>> = out.log_std.map(|t| t.to_vec2()).transpose()?;
        let batch_size = probs
            .first()
            .or(mean.as_ref())
            .map(|v| v.len())
            .unwrap_or(0);

        let mut acts = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let discrete = probs
                .iter()
                .map(|p| match is_training {
                    true => Ok(WeightedIndex::new(&p[i])?.sample(&mut self.rng)),
                    false => Ok(argmax(&p[i])),
                })
                .collect::<Result<Vec<_>>>()?;
            let continuous = match (&mean, &log_std) {
                (Some(mean), Some(log_std)) => self
                    .sizes
                    .continuous_bounds
                    .iter()
                    .enumerate()
                    .map(|(j, &(lo, hi))| {
                        let a = match is_training {
                            true => Normal::new(mean[i][j], log_std[i][j].exp())?
                                .sample(&mut self.rng),
                            false => mean[i][j],
                        };
                        Ok(a.clamp(lo, hi))
                    })
                    .collect::<Result<Vec<_>>>()?,
                _ => vec![],
            };
            acts.push(Act::new(discrete, continuous));
        }
        Ok(acts)
    }

    // Log-probabilities and entropies of the actions; a recurrent actor reads
    // `states` as a single episode starting from the zero state.
    fn log_probs(
        &self,
        states: &Tensor,
        discrete: Option<&Tensor>,
        continuous: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let out = match self.actor.is_recurrent() {
            true => self.actor.forward_seq(&states.unsqueeze(0)?)?,
            false => self.actor.forward(states)?,
        };
        self.actor.log_prob_entropy(&out, discrete, continuous)
    }

    fn rollout(&self, batch: &TransitionBatch) -> Result<Rollout> {
        let n = batch.len();
        let n_discrete = self.sizes.action_sizes.len();
        let n_continuous = self.sizes.n_continuous();
        batch.check_shapes(self.state_dim, n_discrete, n_continuous)?;

        let states = Tensor::from_vec(batch.states(), (n, self.state_dim), &self.device)?;
        let next_states = Tensor::from_vec(batch.next_states(), (n, self.state_dim), &self.device)?;
        let discrete = (n_discrete > 0)
            .then(|| Tensor::from_vec(batch.discrete_actions(), (n, n_discrete), &self.device))
            .transpose()?;
        let continuous = (n_continuous > 0)
            .then(|| Tensor::from_vec(batch.continuous_actions(), (n, n_continuous), &self.device))
            .transpose()?;
        let episodes = episodes(&batch.transitions);

        let stored_values: Option<Vec<f32>> = batch.transitions.iter().map(|t| t.value).collect();
        let values = match stored_values {
            Some(values) => values,
            None => self.critic.forward(&states)?.detach().to_vec1()?,
        };
        let next_values: Vec<f32> = self.critic.forward(&next_states)?.detach().to_vec1()?;

        let stored_log_probs: Option<Vec<f32>> =
            batch.transitions.iter().map(|t| t.log_prob).collect();
        let old_log_probs = match (stored_log_probs, self.actor.is_recurrent()) {
            (Some(lp), _) => Tensor::from_vec(lp, n, &self.device)?,
            (None, false) => self.log_probs(&states, discrete.as_ref(), continuous.as_ref())?.0,
            (None, true) => {
                let lps = episodes
                    .iter()
                    .map(|ep| {
                        let ix = Tensor::arange(ep.start as u32, ep.end as u32, &self.device)?;
                        let (lp, _) = self.log_probs(
                            &states.index_select(&ix, 0)?,
                            select_rows(discrete.as_ref(), &ix)?.as_ref(),
                            select_rows(continuous.as_ref(), &ix)?.as_ref(),
                        )?;
                        Ok(lp)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Tensor::cat(&lps, 0)?
            }
        }
        .detach();

        let dones: Vec<bool> = batch.transitions.iter().map(|t| t.is_done).collect();
        let (mut advantages, returns) = gae(
            &batch.rewards(),
            &values,
            &next_values,
            &dones,
            self.config.discount_factor as f32,
            self.config.gae_lambda as f32,
        );
        normalize(&mut advantages);

        Ok(Rollout {
            states,
            discrete,
            continuous,
            old_log_probs,
            old_values: Tensor::from_vec(values, n, &self.device)?,
            advantages: Tensor::from_vec(advantages, n, &self.device)?,
            returns: Tensor::from_vec(returns, n, &self.device)?,
            episodes,
        })
    }

    // Row indices of the minibatches of an epoch.
    fn minibatches(&mut self, rollout: &Rollout) -> Vec<Vec<u32>> {
        match self.actor.is_recurrent() {
            true => {
                let mut episodes = rollout.episodes.clone();
                episodes.shuffle(&mut self.rng);
                episodes
                    .into_iter()
                    .map(|ep| (ep.start as u32..ep.end as u32).collect())
                    .collect()
            }
            false => {
                let n = rollout.episodes.last().map(|ep| ep.end).unwrap_or(0);
                let mut ixs: Vec<u32> = (0..n as u32).collect();
                ixs.shuffle(&mut self.rng);
                ixs.chunks(self.config.minibatch_size)
                    .map(|c| c.to_vec())
                    .collect()
            }
        }
    }

    fn step(&mut self, rollout: &Rollout, ixs: &[u32]) -> Result<StepStats> {
        let ix = Tensor::from_slice(ixs, ixs.len(), &self.device)?;
        let states = rollout.states.index_select(&ix, 0)?;
        let discrete = select_rows(rollout.discrete.as_ref(), &ix)?;
        let continuous = select_rows(rollout.continuous.as_ref(), &ix)?;
        let old_log_probs = rollout.old_log_probs.index_select(&ix, 0)?;
        let old_values = rollout.old_values.index_select(&ix, 0)?;
        let advantages = rollout.advantages.index_select(&ix, 0)?;
        let returns = rollout.returns.index_select(&ix, 0)?;

        let (log_p, entropy) = self.log_probs(&states, discrete.as_ref(), continuous.as_ref())?;
        let policy_loss =
            clipped_surrogate(&log_p, &old_log_probs, &advantages, self.config.clip_eps)?;
        let values = self.critic.forward(&states)?;
        let value_loss = value_loss(&values, &old_values, &returns, self.config.value_clip_range)?;
        let entropy = entropy.mean_all()?;
        let loss = total_loss(
            &policy_loss,
            &value_loss,
            &entropy,
            self.config.value_coef,
            self.config.entropy_coef,
        )?;
        let loss_value = check_finite(&loss, "PPO loss")?;

        let mut grads = loss.backward()?;
        let grad_norm_actor = self.opt_actor.step(&mut grads)?;
        let grad_norm_critic = self.opt_critic.step(&mut grads)?;

        Ok(StepStats {
            loss: loss_value,
            policy_loss: policy_loss.to_scalar()?,
            value_loss: value_loss.to_scalar()?,
            entropy: entropy.to_scalar()?,
            grad_norm_actor,
            grad_norm_critic,
        })
    }

    fn update(&mut self) -> Result<Record> {
        let batch = TransitionBatch {
            transitions: self.memory.transitions().to_vec(),
            ixs: (0..self.memory.len()).collect(),
            weights: None,
        };
        let rollout = self.rollout(&batch)?;

        let mut sum = StepStats::default();
        let mut n_steps = 0;
        for epoch in 0..self.config.epochs {
            for ixs in self.minibatches(&rollout) {
                let s = self.step(&rollout, &ixs)?;
                trace!(
                    "PPO epoch {}: loss = {}, policy = {}, value = {}, entropy = {}",
                    epoch,
                    s.loss,
                    s.policy_loss,
                    s.value_loss,
                    s.entropy
                );
                sum.loss += s.loss;
                sum.policy_loss += s.policy_loss;
                sum.value_loss += s.value_loss;
                sum.entropy += s.entropy;
                sum.grad_norm_actor += s.grad_norm_actor;
                sum.grad_norm_critic += s.grad_norm_critic;
                n_steps += 1;
            }
        }
        self.n_opts += 1;

        let n = n_steps.max(1) as f32;
        Ok(Record::from_slice(&[
            ("loss", RecordValue::Scalar(sum.loss / n)),
            ("policy_loss", RecordValue::Scalar(sum.policy_loss / n)),
            ("value_loss", RecordValue::Scalar(sum.value_loss / n)),
            ("entropy", RecordValue::Scalar(sum.entropy / n)),
            ("grad_norm_actor", RecordValue::Scalar(sum.grad_norm_actor / n)),
            ("grad_norm_critic", RecordValue::Scalar(sum.grad_norm_critic / n)),
            ("lr_actor", RecordValue::Scalar(self.opt_actor.learning_rate() as f32)),
            ("lr_critic", RecordValue::Scalar(self.opt_critic.learning_rate() as f32)),
            ("n_transitions", RecordValue::Scalar(batch.len() as f32)),
        ]))
    }
}

impl Agent for Ppo {
    fn select_actions(&mut self, states: &[Vec<f32>], is_training: bool) -> Result<Vec<Act>> {
        let xs = self.states_tensor(states)?;
        let out = self.actor.forward(&xs)?;
        self.sample_actions(out, is_training)
    }

    fn is_recurrent(&self) -> bool {
        self.actor.is_recurrent()
    }

    fn select_actions_recurrent(
        &mut self,
        states: &[Vec<f32>],
        memories: &[Option<RecurrentState>],
        is_training: bool,
    ) -> Result<Vec<(Act, RecurrentState)>> {
        if !self.actor.is_recurrent() {
            return Err(LockstepError::config(
                "recurrent action selection called on a non-recurrent agent",
            )
            .into());
        }
        if memories.len() != states.len() {
            return Err(LockstepError::BatchShape(format!(
                "{} recurrent states for {} states",
                memories.len(),
                states.len()
            ))
            .into());
        }

        let hidden = self.config.width;
        let zero = vec![0f32; hidden];
        let mut rows = Vec::with_capacity(memories.len());
        for m in memories.iter() {
            match m {
                None => rows.push((zero.clone(), zero.clone())),
                Some(s) if s.h.len() == hidden && s.c.len() == hidden => {
                    rows.push((s.h.clone(), s.c.clone()))
                }
                Some(s) => {
                    return Err(LockstepError::BatchShape(format!(
                        "recurrent state of dim {} / {}, expected {}",
                        s.h.len(),
                        s.c.len(),
                        hidden
                    ))
                    .into())
                }
            }
        }

        let xs = self.states_tensor(states)?;
        let state = stack_state(&rows, &self.device)?;
        let (out, state) = self.actor.forward_step(&xs, &state)?;
        let acts = self.sample_actions(out, is_training)?;
        let states = split_state(&state)?;
        Ok(acts
            .into_iter()
            .zip(states)
            .map(|(act, (h, c))| (act, RecurrentState { h, c }))
            .collect())
    }

    fn add_transitions(&mut self, transitions: Vec<Transition>) -> Result<()> {
        self.episode_count += transitions.iter().filter(|t| t.is_done).count();
        self.memory.push(transitions);
        Ok(())
    }

    fn optimize(&mut self) -> Result<Option<Record>> {
        if !self.memory.is_ready() {
            return Ok(None);
        }
        let record = self.update()?;
        self.memory.clear();
        Ok(Some(record))
    }

    fn episode_count(&self) -> usize {
        self.episode_count
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        let actor = next_model_path(path, "modelActor")?;
        let critic = next_model_path(path, "modelCritic")?;
        self.varmap_actor.save(&actor)?;
        self.varmap_critic.save(&critic)?;
        info!("Save PPO to {:?} and {:?}", actor, critic);
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let actor = latest_model_path(path, "modelActor")?;
        let critic = latest_model_path(path, "modelCritic")?;
        self.varmap_actor.load(&actor)?;
        self.varmap_critic.load(&critic)?;
        self.opt_actor = Self::build_opt(&self.config, &self.varmap_actor)?;
        self.opt_critic = Self::build_opt(&self.config, &self.varmap_critic)?;
        info!("Load PPO from {:?} and {:?}", actor, critic);
        Ok(())
    }
}
