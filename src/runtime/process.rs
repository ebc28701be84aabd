//! Python interpreter process bootstrap and I/O glue.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{Mutex, MutexGuard},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::error::RuntimeError;

/// Bootstrap module executed by the interpreter.
pub const DRIVER_SOURCE: &str = include_str!("driver.py");

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    op: &'static str,
    id: u64,
    code: &'a str,
    library: Option<&'a str>,
    module: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DriverMessage {
    Ready {
        version: String,
        #[allow(dead_code)]
        pid: u32,
    },
    Result(RawResult),
    Invalid {
        message: String,
    },
}

/// Result of one `exec` request as the driver reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawResult {
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub value: Option<String>,
    pub error: Option<RawError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawError {
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub traceback: String,
}

/// Exclusive access to the interpreter's request/response streams.
pub struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Session {
    /// Send one `exec` request and wait for its response.
    pub async fn exec(
        &mut self,
        id: u64,
        code: &str,
        library: Option<&str>,
        module: &str,
    ) -> Result<RawResult, RuntimeError> {
        let request = ExecRequest {
            op: "exec",
            id,
            code,
            library,
            module,
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| RuntimeError::Driver(format!("encoding request: {}", e)))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await.map_err(crashed)?;
        self.stdin.flush().await.map_err(crashed)?;

        loop {
            let Some(line) = self.stdout.next_line().await.map_err(crashed)? else {
                let status = self.child.try_wait().ok().flatten();
                return Err(RuntimeError::Crashed(match status {
                    Some(status) => format!("interpreter exited with {}", status),
                    None => "interpreter closed its output stream".to_string(),
                }));
            };
            match serde_json::from_str::<DriverMessage>(&line) {
                Ok(DriverMessage::Result(result)) if result.id == Some(id) => return Ok(result),
                Ok(DriverMessage::Invalid { message }) => return Err(RuntimeError::Driver(message)),
                Ok(other) => debug!(?other, "skipping stale driver message"),
                Err(e) => warn!("unreadable driver message ({}): {}", e, line),
            }
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.stdin.write_all(b"{\"op\":\"shutdown\"}\n").await;
        let _ = self.stdin.flush().await;
        match timeout(Duration::from_secs(1), self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "interpreter exited"),
            _ => {
                warn!("interpreter did not exit after shutdown request; killing it");
                let _ = self.child.kill().await;
            }
        }
    }
}

/// A running interpreter executing the driver.
pub struct InterpreterProcess {
    session: Mutex<Session>,
    pid: u32,
    version: String,
    next_id: AtomicU64,
}

impl InterpreterProcess {
    /// Spawn `python` on the driver at `driver_path` and wait for its ready handshake.
    pub async fn start(
        python: &str,
        driver_path: &Path,
        startup_timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let mut cmd = Command::new(python);
        cmd.arg("-u") // unbuffered
            .arg(driver_path)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            RuntimeError::Initialization(format!("failed to spawn {}: {}", python, e))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| RuntimeError::Initialization("interpreter exited during startup".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Initialization("no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Initialization("no stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr);
        }

        let mut stdout = BufReader::new(stdout).lines();
        let handshake = timeout(startup_timeout, stdout.next_line())
            .await
            .map_err(|_| {
                RuntimeError::Initialization(format!(
                    "interpreter did not become ready within {} ms",
                    startup_timeout.as_millis()
                ))
            })?
            .map_err(|e| RuntimeError::Initialization(e.to_string()))?
            .ok_or_else(|| {
                RuntimeError::Initialization("interpreter exited before the ready handshake".into())
            })?;

        let version = match serde_json::from_str::<DriverMessage>(&handshake) {
            Ok(DriverMessage::Ready { version, .. }) => version,
            _ => {
                return Err(RuntimeError::Initialization(format!(
                    "unexpected handshake from interpreter: {}",
                    handshake
                )))
            }
        };
        info!(pid, %version, "python interpreter ready");

        Ok(Self {
            session: Mutex::new(Session {
                child,
                stdin,
                stdout,
            }),
            pid,
            version,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Wait for exclusive use of the interpreter. Overlapping callers queue here in arrival order.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    pub async fn shutdown(&self) {
        self.session.lock().await.shutdown().await;
    }
}

/// Write the driver into `dir` unless an identical copy is already there.
pub fn materialize_driver(dir: &Path) -> io::Result<PathBuf> {
    let digest = md5::compute(DRIVER_SOURCE.as_bytes());
    let path = dir.join(format!("driver-{:x}.py", digest));
    if path.exists() {
        return Ok(path);
    }
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".driver-{:x}.{}.tmp", digest, std::process::id()));
    fs::write(&tmp, DRIVER_SOURCE)?;
    fs::rename(&tmp, &path)?;
    debug!(path = %path.display(), "materialized interpreter driver");
    Ok(path)
}

/// Default output handler: raw interpreter stderr outside any call goes to the log.
fn forward_stderr(stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "pyrunner::interpreter", "{}", line);
        }
    });
}

fn crashed(e: io::Error) -> RuntimeError {
    RuntimeError::Crashed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_is_written_once_per_content() {
        let dir = tempfile::tempdir().unwrap();
        let first = materialize_driver(dir.path()).unwrap();
        let second = materialize_driver(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&first).unwrap(), DRIVER_SOURCE);
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn result_messages_decode() {
        let line = r#"{"type": "result", "id": 3, "ok": false, "stdout": "A\n", "stderr": "", "value": null, "error": {"kind": "ValueError", "message": "boom", "traceback": "tb"}}"#;
        match serde_json::from_str::<DriverMessage>(line).unwrap() {
            DriverMessage::Result(r) => {
                assert_eq!(r.id, Some(3));
                assert!(!r.ok);
                assert_eq!(r.stdout, "A\n");
                assert_eq!(r.error.unwrap().kind, "ValueError");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
