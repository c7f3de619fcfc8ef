//! Interface of neural networks used in RL agents.
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{rnn::LSTMState, VarBuilder};

/// Neural network model not owing its [`VarMap`] internally.
///
/// [`VarMap`]: candle_nn::VarMap
pub trait SubModel1 {
    /// Configuration from which [`SubModel1`] is constructed.
    type Config;

    /// Input of the [`SubModel1`].
    type Input;

    /// Output of the [`SubModel1`].
    type Output;

    /// Builds [`SubModel1`] with [`VarBuilder`] and [`SubModel1::Config`].
    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// A generalized forward function.
    fn forward(&self, input: &Self::Input) -> Result<Self::Output>;
}

/// A [`SubModel1`] that also threads an LSTM state through its forward pass.
pub trait RecurrentSubModel: SubModel1 {
    /// Returns `true` if the model actually contains a recurrent layer.
    ///
    /// Non-recurrent models ignore the state passed to
    /// [`RecurrentSubModel::forward_step`] and hand it back unchanged.
    fn is_recurrent(&self) -> bool;

    /// State at the beginning of an episode for a batch of `batch_size` sequences.
    fn zero_state(&self, batch_size: usize) -> Result<LSTMState>;

    /// Advances one step: `input` is `[batch, ...]`.
    fn forward_step(
        &self,
        input: &Self::Input,
        state: &LSTMState,
    ) -> Result<(Self::Output, LSTMState)>;

    /// Runs a whole sequence from the zero state: `input` is `[1, len, ...]` and
    /// the output has one row per step.
    fn forward_seq(&self, input: &Self::Input) -> Result<Self::Output>;
}

/// Copies `[batch, hidden]` tensors of an LSTM state into host vectors, one per row.
pub fn split_state(state: &LSTMState) -> Result<Vec<(Vec<f32>, Vec<f32>)>> {
    let h: Vec<Vec<f32>> = state.h().to_vec2()?;
    let c: Vec<Vec<f32>> = state.c().to_vec2()?;
    Ok(h.into_iter().zip(c).collect())
}

/// Stacks per-row host vectors into a batched LSTM state.
pub fn stack_state(
    rows: &[(Vec<f32>, Vec<f32>)],
    device: &candle_core::Device,
) -> Result<LSTMState> {
    let hidden = rows.first().map(|(h, _)| h.len()).unwrap_or(0);
    let h = rows.iter().flat_map(|(h, _)| h.iter().copied()).collect::<Vec<_>>();
    let c = rows.iter().flat_map(|(_, c)| c.iter().copied()).collect::<Vec<_>>();
    Ok(LSTMState::new(
        Tensor::from_vec(h, (rows.len(), hidden), device)?,
        Tensor::from_vec(c, (rows.len(), hidden), device)?,
    ))
}
