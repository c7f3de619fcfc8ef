//! DQN agent implemented with candle.
use super::{
    categorical::{expected_values, project},
    config::DqnConfig,
    explorer::ActionSelection,
    qnet::{QNet, QNetConfig},
};
use crate::{
    model::SubModel1,
    opt::OptimizerSet,
    util::{check_finite, latest_model_path, linspace, next_model_path, states_to_tensor, track},
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{ops::log_softmax, ops::softmax, VarBuilder, VarMap};
use log::{info, trace};
use lockstep_core::{
    error::LockstepError,
    record::{Record, RecordValue},
    replay_memory::ReplayMemory,
    Act, Agent, EnvSizes, ExperienceMemory, Transition, TransitionBatch,
};
use rand::{rngs::SmallRng, SeedableRng};
use std::{fs, path::Path};

fn build_qnet(config: &QNetConfig, device: &Device) -> Result<(VarMap, QNet)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let qnet = QNet::build(vb.pp("qnet"), config.clone())?;
    Ok((varmap, qnet))
}

/// TD target `r + γ (1 - done) max_a Q_tgt(s', a)` of one action head.
///
/// `next` holds the target network's values `[batch, n_actions]` on the next states.
fn td_target(rewards: &Tensor, not_dones: &Tensor, next: &Tensor, gamma: f64) -> Result<Tensor> {
    Ok((rewards + ((not_dones * gamma)? * next.max(D::Minus1)?)?)?.detach())
}

#[allow(clippy::upper_case_acronyms)]
/// DQN agent implemented with candle.
///
/// The variant (epsilon-greedy, noisy, categorical or categorical with noise) is
/// chosen from [`DqnConfig`] when the agent is built.
pub struct Dqn {
    config: DqnConfig,
    state_dim: usize,
    action_sizes: Vec<usize>,
    device: Device,
    varmap: VarMap,
    qnet: QNet,
    varmap_tgt: VarMap,
    qnet_tgt: QNet,
    opt: OptimizerSet,
    selection: ActionSelection,
    memory: ReplayMemory,
    rng: SmallRng,
    episode_count: usize,
    n_opts: usize,
}

impl Dqn {
    /// Constructs DQN agent for an environment with the given sizes.
    pub fn build(config: DqnConfig, sizes: &EnvSizes) -> Result<Self> {
        config.validate(sizes)?;
        let device = config.device.build()?;
        let qnet_config = config.qnet_config(sizes);
        let (varmap, qnet) = build_qnet(&qnet_config, &device)?;
        let (varmap_tgt, qnet_tgt) = build_qnet(&qnet_config, &device)?;
        track(&varmap_tgt, &varmap, 1.0)?;
        let opt = Self::build_opt(&config, &varmap)?;

        let support = || linspace(config.v_min, config.v_max, config.n_atoms, &device);
        let selection = match (config.noisy, config.categorical) {
            (false, false) => ActionSelection::Vanilla(config.epsilon.clone()),
            (true, false) => ActionSelection::Noisy,
            (false, true) => ActionSelection::Categorical(support()?),
            (true, true) => ActionSelection::CategoricalNoisy(support()?),
        };
        let memory = ReplayMemory::build(&config.replay_memory)?;
        info!(
            "DQN agent: noisy = {}, categorical = {}, dueling = {}, prioritized = {}",
            config.noisy,
            config.categorical,
            config.dueling,
            memory.is_prioritized()
        );

        Ok(Self {
            state_dim: sizes.state_size.numel(),
            action_sizes: sizes.action_sizes.clone(),
            device,
            varmap,
            qnet,
            varmap_tgt,
            qnet_tgt,
            opt,
            selection,
            memory,
            rng: SmallRng::seed_from_u64(config.seed),
            episode_count: 0,
            n_opts: 0,
            config,
        })
    }

    fn build_opt(config: &DqnConfig, varmap: &VarMap) -> Result<OptimizerSet> {
        OptimizerSet::build(
            varmap.all_vars(),
            &config.opt_config,
            config.lr_scheduler.as_ref(),
            config.max_grad_norm,
        )
    }

    /// The experience memory.
    pub fn memory(&self) -> &ReplayMemory {
        &self.memory
    }

    /// Number of optimization steps so far.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    // Per-sample losses and TD errors for scalar action values, averaged over heads.
    fn td_losses(
        &self,
        preds: &[Tensor],
        next: &[Tensor],
        actions: &Tensor,
        batch: &TransitionBatch,
    ) -> Result<(Tensor, Tensor)> {
        let b = batch.len();
        let rewards = Tensor::from_vec(batch.rewards(), b, &self.device)?;
        let not_dones = Tensor::from_vec(batch.not_dones(), b, &self.device)?;
        let gamma = self.config.discount_factor;
        let mut losses = Tensor::zeros(b, DType::F32, &self.device)?;
        let mut tds = Tensor::zeros(b, DType::F32, &self.device)?;

        for (h, (pred, next)) in preds.iter().zip(next.iter()).enumerate() {
            let a = actions.narrow(1, h, 1)?.contiguous()?;
            let pred = pred.gather(&a, 1)?.squeeze(1)?;
            let tgt = td_target(&rewards, &not_dones, next, gamma)?;
            losses = (losses + self.config.critic_loss.elementwise(&pred, &tgt)?)?;
            tds = (tds + (pred - tgt)?.abs()?.detach())?;
        }

        let n = preds.len() as f64;
        Ok(((losses / n)?, (tds / n)?))
    }

    // Per-sample cross-entropies to the projected target distributions, averaged over heads.
    fn categorical_losses(
        &self,
        support: &Tensor,
        preds: &[Tensor],
        next: &[Tensor],
        actions: &Tensor,
        batch: &TransitionBatch,
    ) -> Result<(Tensor, Tensor)> {
        let b = batch.len();
        let atoms = self.config.n_atoms;
        let rewards = batch.rewards();
        let not_dones = batch.not_dones();
        let mut losses = Tensor::zeros(b, DType::F32, &self.device)?;

        for (h, (pred, next)) in preds.iter().zip(next.iter()).enumerate() {
            let best = expected_values(next, support)?.argmax(D::Minus1)?;
            let ix = best.reshape((b, 1, 1))?.broadcast_as((b, 1, atoms))?.contiguous()?;
            let p_next: Vec<Vec<f32>> = softmax(next, D::Minus1)?
                .gather(&ix, 1)?
                .squeeze(1)?
                .detach()
                .to_vec2()?;
            let m = project(
                &p_next,
                &rewards,
                &not_dones,
                self.config.discount_factor as f32,
                self.config.v_min,
                self.config.v_max,
            );
            let m = Tensor::from_vec(m.concat(), (b, atoms), &self.device)?;

            let ix = actions
                .narrow(1, h, 1)?
                .reshape((b, 1, 1))?
                .broadcast_as((b, 1, atoms))?
                .contiguous()?;
            let log_p = log_softmax(&pred.gather(&ix, 1)?.squeeze(1)?, D::Minus1)?;
            losses = (losses - (m * log_p)?.sum(D::Minus1)?)?;
        }

        let losses = (losses / preds.len() as f64)?;
        let priorities = losses.detach();
        Ok((losses, priorities))
    }

    fn update(&mut self) -> Result<Record> {
        let batch = self.memory.sample(self.config.batch_size)?;
        let n_heads = self.action_sizes.len();
        batch.check_shapes(self.state_dim, n_heads, 0)?;
        let b = batch.len();
        let states = Tensor::from_vec(batch.states(), (b, self.state_dim), &self.device)?;
        let next_states = Tensor::from_vec(batch.next_states(), (b, self.state_dim), &self.device)?;
        let actions = Tensor::from_vec(batch.discrete_actions(), (b, n_heads), &self.device)?;

        self.qnet.reset_noise(&mut self.rng)?;
        let preds = self.qnet.forward_with(&states, true)?;
        let next = self
            .qnet_tgt
            .forward(&next_states)?
            .into_iter()
            .map(|t| t.detach())
            .collect::<Vec<_>>();

        let (losses, priorities) = match &self.selection {
            ActionSelection::Categorical(support) | ActionSelection::CategoricalNoisy(support) => {
                self.categorical_losses(support, &preds, &next, &actions, &batch)?
            }
            _ => self.td_losses(&preds, &next, &actions, &batch)?,
        };
        let loss = match &batch.weights {
            Some(ws) => (losses * Tensor::from_slice(ws, b, &self.device)?)?.mean_all()?,
            None => losses.mean_all()?,
        };
        let loss_value = check_finite(&loss, "DQN loss")?;

        let mut grads = loss.backward()?;
        let grad_norm = self.opt.step(&mut grads)?;

        if self.memory.is_prioritized() {
            let priorities: Vec<f32> = priorities.to_vec1()?;
            self.memory.update_priorities(&batch.ixs, &priorities)?;
        }

        self.n_opts += 1;
        if self.n_opts % self.config.target_update_interval == 0 {
            track(&self.varmap_tgt, &self.varmap, self.config.tau)?;
        }
        trace!("DQN step {}: loss = {}", self.n_opts, loss_value);

        let mut record = Record::from_slice(&[
            ("loss", RecordValue::Scalar(loss_value)),
            ("lr", RecordValue::Scalar(self.opt.learning_rate() as f32)),
            ("grad_norm", RecordValue::Scalar(grad_norm)),
        ]);
        if let Some(eps) = self.selection.eps(self.episode_count) {
            record.insert("epsilon", RecordValue::Scalar(eps as f32));
        }
        if let Some(beta) = self.memory.beta() {
            record.insert("beta", RecordValue::Scalar(beta));
        }
        Ok(record)
    }
}

impl Agent for Dqn {
    fn select_actions(&mut self, states: &[Vec<f32>], is_training: bool) -> Result<Vec<Act>> {
        let xs = states_to_tensor(states, &self.device)?;
        if xs.dim(1)? != self.state_dim {
            return Err(LockstepError::BatchShape(format!(
                "states of dim {}, expected {}",
                xs.dim(1)?,
                self.state_dim
            ))
            .into());
        }
        self.selection.select(
            &mut self.qnet,
            &xs,
            &self.action_sizes,
            self.episode_count,
            is_training,
            &mut self.rng,
        )
    }

    fn add_transitions(&mut self, transitions: Vec<Transition>) -> Result<()> {
        self.episode_count += transitions.iter().filter(|t| t.is_done).count();
        self.memory.push(transitions)
    }

    fn optimize(&mut self) -> Result<Option<Record>> {
        if self.memory.len() < self.config.batch_size {
            return Ok(None);
        }
        Ok(Some(self.update()?))
    }

    fn episode_count(&self) -> usize {
        self.episode_count
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        let qnet = next_model_path(path, "qnet")?;
        let qnet_tgt = next_model_path(path, "qnetTarget")?;
        self.varmap.save(&qnet)?;
        self.varmap_tgt.save(&qnet_tgt)?;
        info!("Save DQN to {:?} and {:?}", qnet, qnet_tgt);
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let qnet = latest_model_path(path, "qnet")?;
        let qnet_tgt = latest_model_path(path, "qnetTarget")?;
        self.varmap.load(&qnet)?;
        self.varmap_tgt.load(&qnet_tgt)?;
        self.opt = Self::build_opt(&self.config, &self.varmap)?;
        info!("Load DQN from {:?} and {:?}", qnet, qnet_tgt);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use lockstep_core::StateSize;

    fn sizes() -> EnvSizes {
        EnvSizes::discrete(StateSize::Vector(3), vec![2, 4])
    }

    fn transitions(n: usize) -> Vec<Transition> {
        (0..n)
            .map(|i| {
                let x = i as f32 * 0.1;
                Transition::new(
                    vec![x, -x, 1.0],
                    Act::discrete(vec![i % 2, i % 4]),
                    1.0,
                    vec![x + 0.1, -x, 1.0],
                    i % 5 == 4,
                )
            })
            .collect()
    }

    fn config() -> DqnConfig {
        DqnConfig::default().batch_size(8).width(16).memory_size(100)
    }

    #[test]
    fn test_warm_up() -> Result<()> {
        let mut agent = Dqn::build(config(), &sizes())?;
        agent.add_transitions(transitions(7))?;
        assert!(agent.optimize()?.is_none());
        agent.add_transitions(transitions(1))?;
        assert!(agent.optimize()?.is_some());
        assert_eq!(agent.n_opts(), 1);
        Ok(())
    }

    #[test]
    fn test_episode_count() -> Result<()> {
        let mut agent = Dqn::build(config(), &sizes())?;
        agent.add_transitions(transitions(10))?;
        assert_eq!(agent.episode_count(), 2);
        Ok(())
    }

    #[test]
    fn test_record_keys() -> Result<()> {
        let mut agent = Dqn::build(config().prioritized(true), &sizes())?;
        agent.add_transitions(transitions(20))?;
        let record = agent.optimize()?.unwrap();
        assert!(record.get_scalar("loss")?.is_finite());
        assert!(record.get_scalar("epsilon")? <= 1.0);
        assert!(record.get_scalar("beta").is_ok());

        let mut agent = Dqn::build(config().noisy(0.5).categorical(-5.0, 5.0, 11), &sizes())?;
        agent.add_transitions(transitions(20))?;
        let record = agent.optimize()?.unwrap();
        assert!(record.get_scalar("loss")?.is_finite());
        assert!(record.get_scalar("epsilon").is_err());
        Ok(())
    }

    #[test]
    fn test_td_target() -> Result<()> {
        let rewards = Tensor::new(&[1.0f32, 0.5], &Device::Cpu)?;
        let not_dones = Tensor::new(&[1.0f32, 0.0], &Device::Cpu)?;
        let next = Tensor::new(&[[0.2f32, 0.7], [3.0, -1.0]], &Device::Cpu)?;
        let tgt: Vec<f32> = td_target(&rewards, &not_dones, &next, 0.9)?.to_vec1()?;
        // 1 + 0.9 * 0.7; the terminal transition keeps its reward only.
        assert!((tgt[0] - 1.63).abs() < 1e-6);
        assert_eq!(tgt[1], 0.5);
        Ok(())
    }

    fn snapshot(varmap: &VarMap) -> Result<Vec<(String, Vec<f32>)>> {
        let data = varmap.data().lock().unwrap();
        let mut vs = data
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.as_tensor().flatten_all()?.to_vec1::<f32>()?)))
            .collect::<Result<Vec<_>>>()?;
        vs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vs)
    }

    #[test]
    fn test_target_sync_cadence() -> Result<()> {
        let config = config().target_update_interval(3).tau(1.0);
        let mut agent = Dqn::build(config, &sizes())?;
        agent.add_transitions(transitions(20))?;
        let tgt_0 = snapshot(&agent.varmap_tgt)?;
        assert_eq!(tgt_0, snapshot(&agent.varmap)?);

        for _ in 0..2 {
            agent.optimize()?.unwrap();
            assert_eq!(snapshot(&agent.varmap_tgt)?, tgt_0);
            assert_ne!(snapshot(&agent.varmap)?, tgt_0);
        }

        // The third update copies the online network.
        agent.optimize()?.unwrap();
        assert_eq!(snapshot(&agent.varmap_tgt)?, snapshot(&agent.varmap)?);
        Ok(())
    }

    #[test]
    fn test_soft_target_update() -> Result<()> {
        let config = config().target_update_interval(1).tau(0.5);
        let mut agent = Dqn::build(config, &sizes())?;
        agent.add_transitions(transitions(20))?;
        let tgt_0 = snapshot(&agent.varmap_tgt)?;

        agent.optimize()?.unwrap();
        let online = snapshot(&agent.varmap)?;
        let tgt_1 = snapshot(&agent.varmap_tgt)?;
        for ((_, v0), ((_, v1), (_, w))) in tgt_0.iter().zip(tgt_1.iter().zip(online.iter())) {
            for ((x0, x1), y) in v0.iter().zip(v1.iter()).zip(w.iter()) {
                assert!((x1 - (0.5 * y + 0.5 * x0)).abs() < 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_actions_in_range() -> Result<()> {
        let mut agent = Dqn::build(config(), &sizes())?;
        let states = vec![vec![0.0, 1.0, 2.0]; 6];
        for is_training in [true, false] {
            let acts = agent.select_actions(&states, is_training)?;
            assert_eq!(acts.len(), 6);
            for act in acts {
                assert!(act.discrete[0] < 2 && act.discrete[1] < 4);
            }
        }
        Ok(())
    }

    #[test]
    fn test_state_dim_mismatch() -> Result<()> {
        let mut agent = Dqn::build(config(), &sizes())?;
        let err = agent.select_actions(&[vec![0.0; 5]], false).unwrap_err();
        assert!(err.downcast_ref::<LockstepError>().is_some());
        Ok(())
    }
}
