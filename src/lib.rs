//! Managed Python execution engine.
//!
//! One long-lived interpreter per session ([`runtime`]), a uniform result
//! contract for running programs on it ([`execution`]), and two consumers
//! built on that contract: a line tracer with a replay cursor ([`tracer`])
//! and an isolated per-test runner ([`harness`]). Both consumers read their
//! results from marker-delimited JSON in the program output ([`protocol`]).

pub mod config;
pub mod error;
pub mod execution;
pub mod harness;
pub mod printer;
pub mod protocol;
pub mod runtime;
pub mod tracer;

pub use config::Config;
pub use error::{ProtocolError, RuntimeError};
pub use execution::{ErrorKind, ExecutionError, ExecutionResult, Invoker};
pub use harness::{ActiveTest, JsonFileStore, MemoryStore, RunSummary, TestHarness, TestStatus, TestStore};
pub use runtime::{RuntimeConfig, RuntimeManager};
pub use tracer::{Debugger, ExecutionStep, Trace, TraceError, Tracer};
