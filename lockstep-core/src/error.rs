//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
///
/// Functions return [`anyhow::Result`]; the root cause of a failure raised by this
/// workspace is one of these variants and can be recovered with
/// `err.downcast_ref::<LockstepError>()`.
#[derive(Error, Debug, PartialEq)]
pub enum LockstepError {
    /// Invalid configuration or misuse of an API, e.g. zero environments or calling
    /// the recurrent interface on a non-recurrent agent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// More transitions were requested than are stored.
    #[error("Insufficient data: requested {requested}, available {available}")]
    InsufficientData {
        /// Number of requested items.
        requested: usize,

        /// Number of stored items.
        available: usize,
    },

    /// A batch whose components do not agree in shape.
    #[error("Malformed batch: {0}")]
    BatchShape(String),

    /// Loss or parameters became non-finite.
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),
}

impl LockstepError {
    /// Shorthand for [`LockstepError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns `true` if the error is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns `true` if the error is caused by missing or malformed data.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. } | Self::BatchShape(_))
    }
}
