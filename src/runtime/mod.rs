//! Runtime manager: exactly one live interpreter per session.
//!
//! Sub-modules:
//! - [`process`]: interpreter process bootstrap and request/response glue.
//! - [`interrupt`]: one-cell interrupt buffer used for cooperative timeouts.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{info, warn};

use crate::error::RuntimeError;

pub mod interrupt;
pub mod process;

pub use interrupt::InterruptBuffer;
pub use process::InterpreterProcess;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interpreter executable.
    pub python: String,
    /// Where the bootstrap module is materialized.
    pub runtime_dir: PathBuf,
    pub startup_timeout: Duration,
    /// Allocate an interrupt buffer when the host supports it.
    pub interrupts: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            runtime_dir: std::env::temp_dir().join("pyrunner").join("runtime"),
            startup_timeout: Duration::from_secs(15),
            interrupts: true,
        }
    }
}

/// The live instance: interpreter plus its optional interrupt buffer.
pub struct Runtime {
    pub process: InterpreterProcess,
    pub interrupt: Option<InterruptBuffer>,
}

type InitFuture = Shared<BoxFuture<'static, Result<Arc<Runtime>, RuntimeError>>>;

#[derive(Default)]
struct State {
    instance: Option<Arc<Runtime>>,
    in_flight: Option<InitFuture>,
    is_loading: bool,
    is_initializing: bool,
    last_error: Option<RuntimeError>,
    bootstraps: usize,
}

pub struct RuntimeManager {
    config: RuntimeConfig,
    state: Arc<Mutex<State>>,
}

impl RuntimeManager {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Idempotent: returns the live instance, joins an in-flight bootstrap, or starts one.
    pub async fn ensure_ready(&self) -> Result<Arc<Runtime>, RuntimeError> {
        let init = {
            let mut state = lock(&self.state);
            if let Some(runtime) = &state.instance {
                return Ok(runtime.clone());
            }
            if let Some(init) = state.in_flight.clone() {
                init
            } else {
                state.bootstraps += 1;
                state.last_error = None;
                state.is_loading = true;
                let init = bootstrap(self.config.clone(), self.state.clone())
                    .boxed()
                    .shared();
                state.in_flight = Some(init.clone());
                init
            }
        };
        init.await
    }

    pub fn instance(&self) -> Option<Arc<Runtime>> {
        lock(&self.state).instance.clone()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.state).instance.is_some()
    }

    /// Bootstrap module is being materialized.
    pub fn is_loading(&self) -> bool {
        lock(&self.state).is_loading
    }

    /// Interpreter is starting up.
    pub fn is_initializing(&self) -> bool {
        lock(&self.state).is_initializing
    }

    pub fn last_error(&self) -> Option<RuntimeError> {
        lock(&self.state).last_error.clone()
    }

    /// Number of bootstraps started over the manager's lifetime.
    pub fn bootstrap_count(&self) -> usize {
        lock(&self.state).bootstraps
    }

    /// Forget `runtime` if it is still the live instance, so the next
    /// [`ensure_ready`](Self::ensure_ready) starts a fresh interpreter.
    pub fn invalidate(&self, runtime: &Arc<Runtime>, reason: RuntimeError) {
        let mut state = lock(&self.state);
        if state
            .instance
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, runtime))
        {
            warn!("discarding python runtime: {}", reason);
            state.instance = None;
            state.last_error = Some(reason);
        }
    }

    pub async fn shutdown(&self) {
        let runtime = lock(&self.state).instance.take();
        if let Some(runtime) = runtime {
            runtime.process.shutdown().await;
        }
    }
}

async fn bootstrap(
    config: RuntimeConfig,
    state: Arc<Mutex<State>>,
) -> Result<Arc<Runtime>, RuntimeError> {
    let result = start_runtime(&config, &state).await;

    let mut state = lock(&state);
    state.in_flight = None;
    state.is_loading = false;
    state.is_initializing = false;
    match &result {
        Ok(runtime) => state.instance = Some(runtime.clone()),
        Err(e) => {
            warn!("python runtime bootstrap failed: {}", e);
            state.last_error = Some(e.clone());
        }
    }
    result
}

async fn start_runtime(
    config: &RuntimeConfig,
    state: &Mutex<State>,
) -> Result<Arc<Runtime>, RuntimeError> {
    info!(python = %config.python, "bootstrapping python runtime");
    let driver = process::materialize_driver(&config.runtime_dir).map_err(|e| {
        RuntimeError::Initialization(format!(
            "writing bootstrap module to {}: {}",
            config.runtime_dir.display(),
            e
        ))
    })?;
    {
        let mut state = lock(state);
        state.is_loading = false;
        state.is_initializing = true;
    }

    let process = InterpreterProcess::start(&config.python, &driver, config.startup_timeout).await?;

    let interrupt = if config.interrupts {
        let buffer = InterruptBuffer::allocate(process.pid());
        if buffer.is_none() {
            warn!("host cannot deliver interrupts; timeouts are unavailable for this session");
        }
        buffer
    } else {
        info!("interrupts disabled by configuration; timeouts are unavailable for this session");
        None
    };

    Ok(Arc::new(Runtime { process, interrupt }))
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
