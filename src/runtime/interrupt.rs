//! One-cell interrupt buffer shared between the host and the interpreter process.
//!
//! The cell holds the pending signal number (`0` when clear). Writing the
//! interrupt sentinel also delivers `SIGINT` to the interpreter, which checks
//! for pending signals between bytecodes and raises `KeyboardInterrupt` there.

use std::sync::atomic::{AtomicI32, Ordering};

use tracing::debug;

/// Value of a cleared cell.
pub const CLEAR: i32 = 0;
/// Value written when the time budget elapses (`SIGINT`).
pub const INTERRUPT: i32 = 2;

#[derive(Debug)]
pub struct InterruptBuffer {
    cell: AtomicI32,
    pid: u32,
}

impl InterruptBuffer {
    /// Allocate a buffer wired to `pid`, or `None` when the host cannot deliver
    /// interrupts to another process.
    pub fn allocate(pid: u32) -> Option<Self> {
        if !Self::supported() {
            return None;
        }
        Some(Self {
            cell: AtomicI32::new(CLEAR),
            pid,
        })
    }

    pub fn supported() -> bool {
        cfg!(unix)
    }

    pub fn reset(&self) {
        self.cell.store(CLEAR, Ordering::SeqCst);
    }

    /// Whether the interrupt sentinel has been written since the last reset.
    pub fn is_set(&self) -> bool {
        self.cell.load(Ordering::SeqCst) == INTERRUPT
    }

    pub fn trigger(&self) {
        self.cell.store(INTERRUPT, Ordering::SeqCst);
        debug!(pid = self.pid, "delivering interrupt to interpreter");
        deliver(self.pid);
    }
}

#[cfg(unix)]
fn deliver(pid: u32) {
    // SAFETY: kill(2) with a pid we spawned and a valid signal number.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc != 0 {
        tracing::warn!(pid, "failed to deliver interrupt: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn deliver(_pid: u32) {}
