//! Environment steps and transitions.
use serde::{Deserialize, Serialize};

/// Action applied to an environment.
///
/// Holds one index per discrete head and one value per continuous head.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Act {
    /// Indices of the discrete heads.
    pub discrete: Vec<usize>,

    /// Values of the continuous heads.
    pub continuous: Vec<f32>,
}

impl Act {
    /// Constructs an action with both kinds of heads.
    pub fn new(discrete: Vec<usize>, continuous: Vec<f32>) -> Self {
        Self {
            discrete,
            continuous,
        }
    }

    /// Constructs an action with discrete heads only.
    pub fn discrete(discrete: Vec<usize>) -> Self {
        Self::new(discrete, vec![])
    }

    /// Constructs an action with continuous heads only.
    pub fn continuous(continuous: Vec<f32>) -> Self {
        Self::new(vec![], continuous)
    }
}

/// Outcome of [`Env::step`](crate::Env::step).
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    /// State after the action.
    pub next_state: Vec<f32>,

    /// Reward of the action.
    pub reward: f32,

    /// `true` if the episode ended with this step.
    pub is_done: bool,
}

impl Step {
    /// Constructs a [`Step`].
    pub fn new(next_state: Vec<f32>, reward: f32, is_done: bool) -> Self {
        Self {
            next_state,
            reward,
            is_done,
        }
    }
}

/// Hidden and cell state of a recurrent policy for a single environment.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentState {
    /// Hidden state.
    pub h: Vec<f32>,

    /// Cell state.
    pub c: Vec<f32>,
}

/// A recorded transition `(s_t, a_t, r_t, s_t+1, done_t)`.
///
/// The optional fields are filled by agents which estimate them while acting;
/// when absent, they are recomputed at optimization time.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// State the action was taken in.
    pub state: Vec<f32>,

    /// Action taken.
    pub act: Act,

    /// Reward received.
    pub reward: f32,

    /// Resulting state.
    pub next_state: Vec<f32>,

    /// `true` if the episode ended with this transition.
    pub is_done: bool,

    /// Log-probability of `act` under the behaviour policy.
    pub log_prob: Option<f32>,

    /// Value estimate of `state`.
    pub value: Option<f32>,

    /// Recurrent state the action was selected with.
    pub recurrent_state: Option<RecurrentState>,
}

impl Transition {
    /// Constructs a transition without the optional fields.
    pub fn new(state: Vec<f32>, act: Act, reward: f32, next_state: Vec<f32>, is_done: bool) -> Self {
        Self {
            state,
            act,
            reward,
            next_state,
            is_done,
            log_prob: None,
            value: None,
            recurrent_state: None,
        }
    }

    /// Sets the log-probability of the action.
    pub fn log_prob(mut self, v: f32) -> Self {
        self.log_prob = Some(v);
        self
    }

    /// Sets the value estimate of the state.
    pub fn value(mut self, v: f32) -> Self {
        self.value = Some(v);
        self
    }

    /// Sets the recurrent state.
    pub fn recurrent_state(mut self, v: Option<RecurrentState>) -> Self {
        self.recurrent_state = v;
        self
    }
}
