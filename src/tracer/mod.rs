//! Line-level tracer and the replay cursor built on top of it.
//!
//! A trace is produced by running an instrumented wrapper around the user
//! source through the [`Invoker`]. The wrapper records one step per executed
//! line and prints the whole trace as a marker-delimited JSON payload, which is
//! decoded here into a [`Trace`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ProtocolError;
use crate::execution::{ErrorKind, ExecutionError, Invoker};
use crate::protocol::TRACE_MARKERS;

pub mod script;

pub use script::{PROGRAM_END, SYNTHETIC_FILENAME};

pub const DEFAULT_MAX_STEPS: usize = 1000;

/// State after one executed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub index: usize,
    /// 1-based source line, or [`PROGRAM_END`] for the terminal step of a clean run.
    pub line: u32,
    pub call_depth: u32,
    /// Visible locals, rendered.
    pub variables: BTreeMap<String, String>,
    /// Names whose rendering differs from the previous step.
    pub changed: BTreeSet<String>,
    #[serde(rename = "stdout")]
    pub stdout_so_far: String,
}

impl ExecutionStep {
    pub fn is_program_end(&self) -> bool {
        self.line == PROGRAM_END
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trace {
    pub success: bool,
    pub steps: Vec<ExecutionStep>,
    pub combined_output: String,
    /// `Kind: message` of the uncaught exception.
    pub error: Option<String>,
    pub error_kind: Option<String>,
    /// The step cap was reached and later steps were dropped.
    pub truncated: bool,
}

impl Trace {
    pub fn final_step(&self) -> Option<&ExecutionStep> {
        self.steps.last()
    }
}

#[derive(Debug, Deserialize)]
struct TracePayload {
    success: bool,
    steps: Vec<ExecutionStep>,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_kind: Option<String>,
    #[serde(default)]
    truncated: bool,
}

impl From<TracePayload> for Trace {
    fn from(p: TracePayload) -> Self {
        Self {
            success: p.success,
            steps: p.steps,
            combined_output: p.output,
            error: p.error,
            error_kind: p.error_kind,
            truncated: p.truncated,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum TraceError {
    /// The runtime is not up yet; there is no trace to show.
    #[error("Python environment is not ready")]
    EnvironmentNotReady,
    /// The wrapper itself failed to run, e.g. it timed out.
    #[error("{0}")]
    Execution(ExecutionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Clone)]
pub struct Tracer {
    invoker: Invoker,
    max_steps: usize,
}

impl Tracer {
    pub fn new(invoker: Invoker) -> Self {
        Self {
            invoker,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Trace `source` from start to finish.
    ///
    /// An exception raised by the user code is part of a successful trace
    /// (`success == false` on the [`Trace`]); `Err` means no trace exists.
    pub async fn trace(&self, source: &str, library: Option<&str>) -> Result<Trace, TraceError> {
        let wrapper = script::build(source, self.max_steps);
        let result = self.invoker.invoke(&wrapper, library).await;
        if let Some(err) = result.error {
            return Err(match err.kind {
                ErrorKind::EnvironmentNotReady => TraceError::EnvironmentNotReady,
                _ => TraceError::Execution(err),
            });
        }

        let trace: Trace = TRACE_MARKERS.decode::<TracePayload>(&result.stdout)?.into();
        debug!(
            steps = trace.steps.len(),
            success = trace.success,
            truncated = trace.truncated,
            "trace decoded"
        );
        Ok(trace)
    }
}

/// Forward/back replay over the most recent trace.
pub struct Debugger {
    tracer: Tracer,
    trace: Option<Trace>,
    position: usize,
}

impl Debugger {
    pub fn new(tracer: Tracer) -> Self {
        Self {
            tracer,
            trace: None,
            position: 0,
        }
    }

    /// Trace `source` and rewind to its first step. The previous trace is
    /// discarded whether or not this one succeeds.
    pub async fn load(&mut self, source: &str, library: Option<&str>) -> Result<&Trace, TraceError> {
        self.trace = None;
        self.position = 0;
        let trace = self.tracer.trace(source, library).await?;
        Ok(self.trace.insert(trace))
    }

    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current_step(&self) -> Option<&ExecutionStep> {
        self.trace.as_ref()?.steps.get(self.position)
    }

    /// Advance one step. Stays on the last step once there.
    pub fn step_forward(&mut self) -> Option<&ExecutionStep> {
        let last = self.trace.as_ref()?.steps.len().checked_sub(1)?;
        self.position = (self.position + 1).min(last);
        self.current_step()
    }

    pub fn step_back(&mut self) -> Option<&ExecutionStep> {
        self.position = self.position.saturating_sub(1);
        self.current_step()
    }

    /// Move to step `index`; out-of-range indices leave the cursor where it is.
    pub fn jump_to(&mut self, index: usize) -> Option<&ExecutionStep> {
        let len = self.trace.as_ref()?.steps.len();
        if index >= len {
            return None;
        }
        self.position = index;
        self.current_step()
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn is_at_end(&self) -> bool {
        self.trace
            .as_ref()
            .map_or(true, |t| self.position + 1 >= t.steps.len())
    }
}
