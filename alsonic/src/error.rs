//! Error types for alsonic

use thiserror::Error;

/// Errors reported synchronously by API calls.
///
/// The render path never produces these; anything that goes wrong while rendering is
/// turned into silence and resolved in post-render.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlSonicError {
    /// A malformed parameter (negative size, NaN position, gain out of range, ...)
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A legal parameter that is illegal for the object's current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// An id that does not name a live buffer or source
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// No mixer bus or converter slot is available
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The requested audio format is not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),
}

pub type Result<T> = std::result::Result<T, AlSonicError>;

impl AlSonicError {
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::InvalidOperation(format!("{} lock poisoned", what))
    }
}
