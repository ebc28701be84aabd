//! Runs one script to completion on the shared interpreter.
//!
//! Per call the driver swaps stdout/stderr for call-local buffers and resets the
//! virtual library module before any user code runs; the host arms the
//! interrupt watchdog around the request and relabels the resulting interrupt.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{ErrorKind, ExecutionError, ExecutionResult};
use crate::error::RuntimeError;
use crate::runtime::{process::RawResult, Runtime, RuntimeManager};

/// Exception the interpreter raises when the interrupt sentinel is delivered.
const INTERRUPT_EXCEPTION: &str = "KeyboardInterrupt";

pub const DEFAULT_LIBRARY_MODULE: &str = "library";

#[derive(Clone)]
pub struct Invoker {
    runtime: Arc<RuntimeManager>,
    timeout: Option<Duration>,
    library_module: String,
}

impl Invoker {
    pub fn new(runtime: Arc<RuntimeManager>) -> Self {
        Self {
            runtime,
            timeout: None,
            library_module: DEFAULT_LIBRARY_MODULE.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name under which `library` code is importable.
    pub fn with_library_module(mut self, name: impl Into<String>) -> Self {
        self.library_module = name.into();
        self
    }

    pub fn runtime(&self) -> &Arc<RuntimeManager> {
        &self.runtime
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `source`, with `library` installed as an importable module for this call only.
    ///
    /// Never fails: every outcome, including a runtime that is not ready, is
    /// reported through the returned [`ExecutionResult`].
    #[tracing::instrument(skip_all, fields(bytes = source.len(), library = library.is_some()))]
    pub async fn invoke(&self, source: &str, library: Option<&str>) -> ExecutionResult {
        let Some(runtime) = self.runtime.instance() else {
            debug!("invoke called before the runtime was ready");
            return ExecutionResult::not_ready();
        };

        let started = Instant::now();
        let mut session = runtime.process.lock().await;
        let id = runtime.process.next_request_id();

        // Cleared on every call, timed or not, so an earlier timeout cannot leak in.
        if let Some(buffer) = &runtime.interrupt {
            buffer.reset();
        }
        let watchdog = self.arm_watchdog(&runtime);
        let outcome = session
            .exec(id, source, library, &self.library_module)
            .await;
        if let Some(watchdog) = watchdog {
            watchdog.abort();
            // A trigger already in progress must finish before the next call owns the session.
            let _ = watchdog.await;
        }
        let interrupted = runtime
            .interrupt
            .as_ref()
            .is_some_and(|buffer| buffer.is_set());
        drop(session);

        let mut result = match outcome {
            Ok(raw) => into_result(raw, interrupted),
            Err(e) => {
                if matches!(e, RuntimeError::Crashed(_)) {
                    self.runtime.invalidate(&runtime, e.clone());
                }
                ExecutionResult::failure(ExecutionError::new(runtime_failure(&e), e.to_string()))
            }
        };
        result.duration = started.elapsed();

        match &result.error {
            Some(err) if err.kind == ErrorKind::Timeout => {
                info!(elapsed_ms = result.duration.as_millis() as u64, "execution timed out")
            }
            Some(err) => debug!(kind = %err.kind, "execution failed"),
            None => debug!(elapsed_ms = result.duration.as_millis() as u64, "execution finished"),
        }
        result
    }

    /// Schedule the deferred interrupt write.
    fn arm_watchdog(&self, runtime: &Arc<Runtime>) -> Option<JoinHandle<()>> {
        let budget = self.timeout?;
        runtime.interrupt.as_ref()?;

        let runtime = runtime.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            if let Some(buffer) = &runtime.interrupt {
                buffer.trigger();
            }
        }))
    }
}

/// Kind reported when the request never produced a result.
fn runtime_failure(e: &RuntimeError) -> ErrorKind {
    match e {
        RuntimeError::Driver(_) => ErrorKind::DriverError,
        RuntimeError::NotReady => ErrorKind::EnvironmentNotReady,
        RuntimeError::Crashed(_) | RuntimeError::Initialization(_) => ErrorKind::RuntimeCrashed,
    }
}

fn into_result(raw: RawResult, interrupted: bool) -> ExecutionResult {
    let error = match raw.error {
        Some(e) if interrupted && e.kind == INTERRUPT_EXCEPTION => Some(ExecutionError::timeout()),
        Some(e) => Some(ExecutionError {
            kind: ErrorKind::from(e.kind),
            message: e.message,
            raw_trace: e.traceback,
        }),
        None if !raw.ok => Some(ExecutionError::new(
            ErrorKind::Exception("Error".into()),
            "execution failed without an exception",
        )),
        None => None,
    };

    ExecutionResult {
        success: error.is_none(),
        stdout: raw.stdout,
        stderr: raw.stderr,
        return_value: if error.is_none() { raw.value } else { None },
        error,
        duration: Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::TIMEOUT_MESSAGE;
    use crate::runtime::process::RawError;

    fn raw_failure(kind: &str) -> RawResult {
        RawResult {
            id: Some(1),
            ok: false,
            stdout: "partial\n".into(),
            stderr: String::new(),
            value: None,
            error: Some(RawError {
                kind: kind.into(),
                message: String::new(),
                traceback: "Traceback ...\nKeyboardInterrupt\n".into(),
            }),
        }
    }

    #[test]
    fn fired_interrupt_is_relabelled_as_timeout() {
        let res = into_result(raw_failure("KeyboardInterrupt"), true);
        assert!(!res.success);
        let err = res.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.message, TIMEOUT_MESSAGE);
        assert!(!err.raw_trace.contains("KeyboardInterrupt"));
        assert_eq!(res.stdout, "partial\n");
    }

    #[test]
    fn user_raised_interrupt_keeps_its_name() {
        let res = into_result(raw_failure("KeyboardInterrupt"), false);
        assert_eq!(
            res.error.unwrap().kind,
            ErrorKind::Exception("KeyboardInterrupt".into())
        );
    }

    #[test]
    fn success_carries_return_value() {
        let raw = RawResult {
            id: Some(2),
            ok: true,
            stdout: "B\n".into(),
            stderr: String::new(),
            value: Some("3".into()),
            error: None,
        };
        let res = into_result(raw, false);
        assert!(res.success);
        assert_eq!(res.return_value.as_deref(), Some("3"));
    }

    #[test]
    fn rejected_request_is_not_a_crash() {
        let rejected = RuntimeError::Driver("unknown op".into());
        assert_eq!(runtime_failure(&rejected), ErrorKind::DriverError);
        let crashed = RuntimeError::Crashed("exit status: 1".into());
        assert_eq!(runtime_failure(&crashed), ErrorKind::RuntimeCrashed);
    }

    #[tokio::test]
    async fn invoke_before_ready_short_circuits() {
        let manager = Arc::new(RuntimeManager::new(Default::default()));
        let res = Invoker::new(manager).invoke("print('hi')", None).await;
        assert!(!res.success);
        assert_eq!(res.error_kind(), Some(&ErrorKind::EnvironmentNotReady));
        assert!(res.stdout.is_empty());
    }
}
