use thiserror::Error;

/// Errors surfaced by the decoder facade and the worker proxy.
///
/// `Clone` so a memoized initialization failure can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RawError {
    /// Module load or decoder creation failure, displayed verbatim
    #[error("{0}")]
    Init(String),

    /// Error raised by the native decoder, displayed verbatim
    #[error("{0}")]
    Native(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Worker is no longer running")]
    WorkerClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RawError {
    /// Shorthand for a native decoder failure
    pub fn native(msg: impl Into<String>) -> Self {
        RawError::Native(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RawError>;
