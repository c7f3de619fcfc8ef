mod common;
use anyhow::Result;
use common::{run, ChoiceEnv};
use lockstep_candle_agent::dqn::{Dqn, DqnConfig, EpsilonSchedule};
use lockstep_core::{error::LockstepError, Act, Agent, Env, Transition};
use tempdir::TempDir;

fn config() -> DqnConfig {
    DqnConfig::default()
        .batch_size(16)
        .width(16)
        .memory_size(500)
}

fn finished_episodes(n: usize) -> Vec<Transition> {
    (0..n)
        .map(|_| {
            Transition::new(
                vec![0.0; 4],
                Act::discrete(vec![0]),
                0.0,
                vec![0.0; 4],
                true,
            )
        })
        .collect()
}

#[test]
fn test_epsilon_greedy_end_to_end() -> Result<()> {
    let env = ChoiceEnv::new(5, 0);
    let config = config().epsilon(EpsilonSchedule {
        eps_start: 1.0,
        eps_end: 0.0,
        eps_decay: 1.0,
    });
    let mut agent = Dqn::build(config, &env.sizes())?;
    let states = vec![vec![0.2, 0.8, 0.5, 0.0]; 2000];

    // Episode 0: every draw is random.
    let acts = agent.select_actions(&states, true)?;
    let n_zeros = acts.iter().filter(|a| a.discrete[0] == 0).count();
    assert!((800..1200).contains(&n_zeros), "n_zeros = {}", n_zeros);

    // After many episodes epsilon vanishes and selection is greedy.
    agent.add_transitions(finished_episodes(100))?;
    assert_eq!(agent.episode_count(), 100);
    let greedy = agent.select_actions(&states, false)?;
    let acts = agent.select_actions(&states, true)?;
    assert_eq!(acts, greedy);
    Ok(())
}

fn train(config: DqnConfig, grid: bool) -> Result<()> {
    let envs = (0..2)
        .map(|i| match grid {
            true => ChoiceEnv::new(5, i).grid(),
            false => ChoiceEnv::new(5, i),
        })
        .collect::<Vec<_>>();
    let agent = Dqn::build(config, &envs[0].sizes())?;
    let (coordinator, records, episodes) = run(envs, agent, 60)?;

    assert_eq!(episodes.len(), 24);
    assert!(!records.is_empty());
    for record in records.iter() {
        assert!(record.get_scalar("loss")?.is_finite());
        assert!(record.get_scalar("grad_norm")?.is_finite());
    }
    let agent = coordinator.agent().unwrap();
    assert_eq!(agent.episode_count(), 24);
    assert_eq!(agent.n_opts(), records.len());
    Ok(())
}

#[test]
fn test_vanilla() -> Result<()> {
    train(config(), false)
}

#[test]
fn test_noisy() -> Result<()> {
    train(config().noisy(0.5), false)
}

#[test]
fn test_categorical() -> Result<()> {
    train(config().categorical(-5.0, 5.0, 21), false)
}

#[test]
fn test_categorical_noisy_dueling() -> Result<()> {
    train(config().categorical(-5.0, 5.0, 21).noisy(0.5).dueling(true), false)
}

#[test]
fn test_prioritized() -> Result<()> {
    train(config().prioritized(true).dueling(true), false)
}

#[test]
fn test_grid_states() -> Result<()> {
    train(config(), true)
}

#[test]
fn test_non_finite_loss_halts() -> Result<()> {
    let envs = vec![ChoiceEnv::new(5, 0).fixed_reward(f32::NAN)];
    let agent = Dqn::build(config().batch_size(4), &envs[0].sizes())?;
    let err = run(envs, agent, 20).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<LockstepError>(),
        Some(LockstepError::Numerical(_))
    ));
    Ok(())
}

#[test]
fn test_recurrent_is_rejected() -> Result<()> {
    let sizes = ChoiceEnv::new(5, 0).sizes();
    let mut config = config();
    config.recurrent = true;
    let err = Dqn::build(config, &sizes).err().unwrap();
    assert!(err.downcast_ref::<LockstepError>().unwrap().is_config());

    let mut agent = Dqn::build(self::config(), &sizes)?;
    assert!(!agent.is_recurrent());
    let err = agent
        .select_actions_recurrent(&[vec![0.0; 4]], &[None], true)
        .unwrap_err();
    assert!(err.downcast_ref::<LockstepError>().unwrap().is_config());
    Ok(())
}

#[test]
fn test_save_and_load() -> Result<()> {
    let envs = vec![ChoiceEnv::new(5, 0), ChoiceEnv::new(5, 1)];
    let sizes = envs[0].sizes();
    let agent = Dqn::build(config(), &sizes)?;
    let (mut coordinator, _, _) = run(envs, agent, 30)?;
    let agent = coordinator.agent_mut()?.unwrap();

    let dir = TempDir::new("dqn")?;
    agent.save_params(dir.path())?;
    agent.save_params(dir.path())?;
    for name in ["qnet_1", "qnet_2", "qnetTarget_1", "qnetTarget_2"] {
        assert!(dir.path().join(format!("{}.safetensors", name)).exists());
    }

    let states = (0..20)
        .map(|i| vec![i as f32 / 20.0, 1.0 - i as f32 / 20.0, 0.5, 0.0])
        .collect::<Vec<_>>();
    let expected = agent.select_actions(&states, false)?;

    let mut loaded = Dqn::build(config().seed(7), &sizes)?;
    loaded.load_params(dir.path())?;
    assert_eq!(loaded.select_actions(&states, false)?, expected);
    Ok(())
}

#[test]
fn test_load_from_empty_dir() -> Result<()> {
    let dir = TempDir::new("dqn_empty")?;
    let mut agent = Dqn::build(config(), &ChoiceEnv::new(5, 0).sizes())?;
    let err = agent.load_params(dir.path()).unwrap_err();
    assert!(err.downcast_ref::<LockstepError>().unwrap().is_config());
    Ok(())
}
