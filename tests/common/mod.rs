#![allow(dead_code)]

use std::{process::Command, sync::Arc, time::Duration};

use pyrunner::{Invoker, RuntimeConfig, RuntimeManager};
use tempfile::TempDir;

/// Interpreter used by the tests, or `None` when the machine has none.
pub fn python() -> Option<String> {
    let python = std::env::var("PYRUNNER_PYTHON").unwrap_or_else(|_| "python3".into());
    let ok = Command::new(&python)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    ok.then_some(python)
}

/// A manager with its own runtime directory. Keep the `TempDir` alive for the test.
pub fn manager() -> Option<(Arc<RuntimeManager>, TempDir)> {
    let Some(python) = python() else {
        eprintln!("skipping: no python interpreter found (set PYRUNNER_PYTHON)");
        return None;
    };
    let dir = tempfile::tempdir().ok()?;
    let config = RuntimeConfig {
        python,
        runtime_dir: dir.path().to_path_buf(),
        startup_timeout: Duration::from_secs(30),
        interrupts: true,
    };
    Some((Arc::new(RuntimeManager::new(config)), dir))
}

/// A ready runtime and an invoker on it.
pub async fn ready_invoker() -> anyhow::Result<Option<(Invoker, TempDir)>> {
    let Some((manager, dir)) = manager() else {
        return Ok(None);
    };
    manager.ensure_ready().await?;
    Ok(Some((Invoker::new(manager), dir)))
}
