//! Multilayer perceptron trunk shared by the value and policy networks.
//!
//! The trunk maps a flat state to a `width`-dimensional feature vector. Grid states are
//! first passed through a single-channel convolution, and recurrent trunks put an LSTM
//! between the encoder and the dense layers.
mod base;
mod config;
pub use base::Mlp;
pub use config::{Activation, MlpConfig};
