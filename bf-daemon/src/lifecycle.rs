//! Daemon lifecycle
//!
//! `Starting → Running → ShuttingDown → Stopped`. A single instance per host
//! is enforced with an advisory lock; termination signals only set a flag
//! that the control loop observes between cycles, so an in-flight actuation
//! is never cut short. On the way out the board is handed back to automatic
//! control exactly once.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use bf_core::constants::timing::SLEEP_SLICE;
use bf_core::IpmiTransport;
use bf_error::{BmcfanError, Result};

use crate::control_loop::{run_control_loop, Controller};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Forward-only state tracker
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Starting,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn advance(&mut self, next: LifecycleState) {
        if next <= self.state {
            warn!("Ignoring lifecycle transition {} -> {}", self.state, next);
            return;
        }
        info!("Lifecycle: {} -> {}", self.state, next);
        self.state = next;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Shutdown request shared between the signal listener and the control loop
#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices, returning `true` as soon as
    /// shutdown has been requested.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = SLEEP_SLICE.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(slice) => {}
                _ = self.notify.notified() => {
                    debug!("Interval sleep interrupted");
                }
            }
        }
    }
}

/// Install SIGTERM/SIGINT handlers that request shutdown.
///
/// Handlers are registered before returning so a signal arriving during
/// startup is not lost.
pub fn listen_for_signals(shutdown: Arc<Shutdown>) -> io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        info!("SIGNAL: Received {} - initiating shutdown", name);
        shutdown.trigger();
    });
    Ok(())
}

/// Held for the lifetime of the process; the lock is released when the file
/// is closed.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

#[derive(Debug)]
pub enum LockOutcome {
    Acquired(InstanceLock),
    /// Another live instance owns the lock
    Held { pid: Option<u32> },
}

impl InstanceLock {
    /// Take the non-blocking exclusive lock and record our PID in the file
    pub fn acquire(path: &Path) -> Result<LockOutcome> {
        let lock_err = |source: io::Error| BmcfanError::Lock {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(path)
            .map_err(lock_err)?;

        // SAFETY: flock only operates on the descriptor, which stays open for
        // the lifetime of `file`.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                let mut contents = String::new();
                let pid = file
                    .read_to_string(&mut contents)
                    .ok()
                    .and_then(|_| contents.trim().parse().ok());
                return Ok(LockOutcome::Held { pid });
            }
            return Err(lock_err(err));
        }

        file.set_len(0).map_err(lock_err)?;
        file.seek(SeekFrom::Start(0)).map_err(lock_err)?;
        writeln!(file, "{}", std::process::id()).map_err(lock_err)?;
        file.sync_all().map_err(lock_err)?;

        debug!("Lock acquired: {:?}", path);
        Ok(LockOutcome::Acquired(InstanceLock {
            _file: file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Drive a controller through the whole lifecycle and return the final state.
///
/// Manual-mode entry failing is logged but not fatal; the automatic-mode
/// hand-back is still attempted on exit because a timed-out entry command
/// may have reached the BMC.
pub async fn run<T: IpmiTransport>(
    controller: &mut Controller<T>,
    shutdown: &Shutdown,
    once: bool,
) -> LifecycleState {
    let mut lifecycle = Lifecycle::new();

    match controller.enter_manual_mode().await {
        Ok(true) => info!("Manual fan control enabled"),
        Ok(false) => debug!("{} dialect needs no manual mode", controller.policy()),
        Err(e) => error!("Failed to enable manual fan control: {}", e),
    }

    lifecycle.advance(LifecycleState::Running);
    run_control_loop(controller, shutdown, once).await;

    lifecycle.advance(LifecycleState::ShuttingDown);
    controller.restore_automatic_mode().await;
    controller.publish_final();

    lifecycle.advance(LifecycleState::Stopped);
    lifecycle.state()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_only_moves_forward() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Starting);

        lifecycle.advance(LifecycleState::Running);
        lifecycle.advance(LifecycleState::Starting);
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        lifecycle.advance(LifecycleState::Stopped);
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_lock_is_exclusive_and_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/bmcfan.lock");

        let first = InstanceLock::acquire(&path).unwrap();
        assert!(matches!(first, LockOutcome::Acquired(_)));

        match InstanceLock::acquire(&path).unwrap() {
            LockOutcome::Held { pid } => assert_eq!(pid, Some(std::process::id())),
            LockOutcome::Acquired(_) => panic!("second lock should not be granted"),
        }

        drop(first);
        assert!(matches!(InstanceLock::acquire(&path).unwrap(), LockOutcome::Acquired(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_runs_to_completion() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert!(!shutdown.sleep(Duration::from_secs(10)).await);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_promptly() {
        let shutdown = Arc::new(Shutdown::new());
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.trigger();
        });

        let start = Instant::now();
        assert!(shutdown.sleep(Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(3) + SLEEP_SLICE);
    }

    #[tokio::test]
    async fn test_sigterm_requests_shutdown() {
        let shutdown = Arc::new(Shutdown::new());
        listen_for_signals(shutdown.clone()).unwrap();
        assert!(!shutdown.is_triggered());

        // The handler is installed, so the default action no longer applies
        let rc = unsafe { libc::raise(libc::SIGTERM) };
        assert_eq!(rc, 0);

        assert!(shutdown.sleep(Duration::from_secs(5)).await);
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_sleep_returns_immediately_when_already_triggered() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(shutdown.sleep(Duration::from_secs(3600)).await);
    }
}
