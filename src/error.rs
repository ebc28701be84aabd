//! Error taxonomy shared by the runtime, the invoker and both protocol consumers.

use thiserror::Error;

/// Failures of the runtime lifecycle itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Python environment is not ready")]
    NotReady,
    #[error("Failed to initialize the Python runtime: {0}")]
    Initialization(String),
    #[error("Python runtime exited unexpectedly: {0}")]
    Crashed(String),
    #[error("Python driver rejected the request: {0}")]
    Driver(String),
}

/// Failures decoding a marker-delimited payload. Always attributed to the consumer
/// that expected the payload, never to the executed program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("could not find {consumer} markers in program output")]
    MissingMarkers { consumer: &'static str },
    #[error("failed to parse {consumer} payload: {message}")]
    InvalidJson {
        consumer: &'static str,
        message: String,
    },
    #[error("{consumer} payload belongs to '{found}', expected '{expected}'")]
    IdentityMismatch {
        consumer: &'static str,
        expected: String,
        found: String,
    },
}
