//! Execution engine: result contract shared by every consumer.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

pub mod invoker;

pub use invoker::Invoker;

/// Message shown for every timeout, whatever the interrupt mechanism reported.
pub const TIMEOUT_MESSAGE: &str = "Execution timed out: the program exceeded its time budget.";

/// What went wrong in a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorKind {
    /// The runtime was not initialized when the call arrived.
    EnvironmentNotReady,
    /// The cooperative interrupt fired after the time budget elapsed.
    Timeout,
    /// The interpreter process went away mid-call.
    RuntimeCrashed,
    /// The driver rejected the request; the interpreter is still alive.
    DriverError,
    /// An exception raised by the executed source, named as the interpreter names it.
    Exception(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::EnvironmentNotReady => "EnvironmentNotReady",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::RuntimeCrashed => "RuntimeCrashed",
            ErrorKind::DriverError => "DriverError",
            ErrorKind::Exception(name) => name,
        }
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "EnvironmentNotReady" => ErrorKind::EnvironmentNotReady,
            "Timeout" => ErrorKind::Timeout,
            "RuntimeCrashed" => ErrorKind::RuntimeCrashed,
            "DriverError" => ErrorKind::DriverError,
            _ => ErrorKind::Exception(s),
        }
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Formatted traceback as the interpreter printed it; empty when there is none.
    #[serde(default)]
    pub raw_trace: String,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_trace: String::new(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, TIMEOUT_MESSAGE)
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Outcome of one invocation. `stdout`/`stderr` hold whatever the program
/// wrote before it finished or failed.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub return_value: Option<String>,
    pub error: Option<ExecutionError>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn failure(error: ExecutionError) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn not_ready() -> Self {
        Self::failure(ExecutionError::new(
            ErrorKind::EnvironmentNotReady,
            crate::error::RuntimeError::NotReady.to_string(),
        ))
    }

    pub fn error_kind(&self) -> Option<&ErrorKind> {
        self.error.as_ref().map(|e| &e.kind)
    }
}
