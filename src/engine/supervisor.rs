//! Engine launcher / process traits and the production implementations.
//!
//! [`EngineLauncher`] and [`EngineProcess`] are the seams the session is
//! tested through: [`ScriptLauncher`] / [`ChildProcess`] are the production
//! pair, and `MockLauncher` / `MockProcess` (under `#[cfg(test)]`) stand in
//! for them so no real interpreter is needed in unit tests.
//!
//! The credential reaches the child only through an environment variable —
//! never the command line, which would leak it in process listings.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// LaunchError
// ---------------------------------------------------------------------------

/// All errors that can arise while starting the engine process.
///
/// Launch failures are fatal to the current `start` attempt and surfaced to
/// the caller; there is no automatic retry at this layer.
#[derive(Debug, Clone, Error)]
pub enum LaunchError {
    /// The engine script asset is not present at the expected path.
    #[error("Engine script not found: {0}")]
    ScriptMissing(String),

    /// The interpreter could not be found or the process failed to spawn.
    #[error("Failed to start engine process: {0}")]
    Spawn(String),
}

// ---------------------------------------------------------------------------
// EngineProcess / EngineLauncher traits
// ---------------------------------------------------------------------------

/// Handle to a running engine process.
///
/// Implementations must be `Send` so the handle can move into the session's
/// teardown context.
pub trait EngineProcess: Send {
    /// Non-blocking liveness check.
    fn is_alive(&mut self) -> bool;

    /// Request graceful termination; force-kill after the grace period.
    ///
    /// Idempotent — terminating an already-stopped process is a no-op.
    /// Never fails: kill errors are logged, not raised.
    fn terminate(&mut self);
}

/// Starts engine processes.
///
/// Implementations must be `Send + Sync` so a launcher can be shared with
/// the reconnect context behind an `Arc<dyn EngineLauncher>`.
pub trait EngineLauncher: Send + Sync {
    /// Start the engine with `credential` injected via environment.
    ///
    /// # Errors
    ///
    /// - [`LaunchError::ScriptMissing`] — `script` does not exist.
    /// - [`LaunchError::Spawn`] — interpreter missing or spawn failed.
    fn launch(&self, script: &Path, credential: &str)
        -> Result<Box<dyn EngineProcess>, LaunchError>;
}

// Compile-time assertion: Box<dyn EngineLauncher> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn EngineLauncher>, _: Box<dyn EngineProcess>) {}
};

// ---------------------------------------------------------------------------
// ScriptLauncher
// ---------------------------------------------------------------------------

/// Production launcher: runs `<interpreter> <script>` with the credential
/// in the configured environment variable and the child's stdout/stderr
/// drained into the log sink by dedicated reader threads.
#[derive(Debug, Clone)]
pub struct ScriptLauncher {
    interpreter: String,
    credential_env: String,
    shutdown_grace: Duration,
}

impl ScriptLauncher {
    pub fn new(
        interpreter: impl Into<String>,
        credential_env: impl Into<String>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            interpreter: interpreter.into(),
            credential_env: credential_env.into(),
            shutdown_grace,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.interpreter.clone(),
            config.credential_env.clone(),
            config.shutdown_grace(),
        )
    }
}

impl EngineLauncher for ScriptLauncher {
    fn launch(
        &self,
        script: &Path,
        credential: &str,
    ) -> Result<Box<dyn EngineProcess>, LaunchError> {
        if !script.exists() {
            return Err(LaunchError::ScriptMissing(script.display().to_string()));
        }

        let mut child = Command::new(&self.interpreter)
            .arg(script)
            .env(&self.credential_env, credential)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;

        log::info!("engine: launched {} {}", self.interpreter, script.display());

        if let Some(stdout) = child.stdout.take() {
            forward_output("engine-stdout", stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output("engine-stderr", stderr, true);
        }

        Ok(Box::new(ChildProcess {
            child,
            shutdown_grace: self.shutdown_grace,
        }))
    }
}

/// Drain one child output pipe line-by-line into the log sink.
///
/// The thread exits when the pipe closes (engine exit or kill).
fn forward_output(thread_name: &str, pipe: impl Read + Send + 'static, is_stderr: bool) {
    let spawned = std::thread::Builder::new()
        .name(thread_name.into())
        .spawn(move || {
            let reader = BufReader::new(pipe);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if is_stderr {
                    log::warn!("engine: {line}");
                } else {
                    log::info!("engine: {line}");
                }
            }
        });

    if let Err(e) = spawned {
        log::warn!("engine: failed to spawn output forwarder: {e}");
    }
}

// ---------------------------------------------------------------------------
// ChildProcess
// ---------------------------------------------------------------------------

/// Production process handle wrapping a [`std::process::Child`].
pub struct ChildProcess {
    child: Child,
    shutdown_grace: Duration,
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess")
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}

impl EngineProcess for ChildProcess {
    fn is_alive(&mut self) -> bool {
        // try_wait is non-blocking; Err means we lost track — assume dead.
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) {
        if !self.is_alive() {
            return;
        }

        // Closing stdin signals the engine to exit; supervised script
        // engines conventionally shut down on EOF.
        drop(self.child.stdin.take());

        let deadline = Instant::now() + self.shutdown_grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::info!("engine: exited ({status})");
                    return;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    log::warn!("engine: liveness check failed during shutdown: {e}");
                    break;
                }
            }
        }

        log::warn!("engine: did not exit within grace period, killing");
        if let Err(e) = self.child.kill() {
            log::warn!("engine: kill failed: {e}");
        }
        // Reap so the kill does not leave a zombie behind.
        let _ = self.child.wait();
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Owns at most one live engine process at a time.
///
/// [`ensure_running`](Self::ensure_running) launches only when no live
/// process exists, so repeated `start` calls cannot stack up engines;
/// [`terminate`](Self::terminate) is idempotent and never fails.
pub struct Supervisor {
    launcher: Box<dyn EngineLauncher>,
    process: Mutex<Option<Box<dyn EngineProcess>>>,
}

impl Supervisor {
    pub fn new(launcher: Box<dyn EngineLauncher>) -> Self {
        Self {
            launcher,
            process: Mutex::new(None),
        }
    }

    /// Launch the engine unless a live process already exists.
    pub fn ensure_running(&self, script: &Path, credential: &str) -> Result<(), LaunchError> {
        let mut guard = self.process.lock().unwrap();

        if let Some(process) = guard.as_mut() {
            if process.is_alive() {
                log::debug!("engine: already running, launch skipped");
                return Ok(());
            }
            // Stale handle from a crashed engine — reap before relaunching.
            process.terminate();
        }

        *guard = Some(self.launcher.launch(script, credential)?);
        Ok(())
    }

    /// Non-blocking liveness check; `false` when nothing was launched.
    pub fn is_alive(&self) -> bool {
        let mut guard = self.process.lock().unwrap();
        guard.as_mut().is_some_and(|p| p.is_alive())
    }

    /// Terminate and release the current process, if any.
    pub fn terminate(&self) {
        let taken = self.process.lock().unwrap().take();
        if let Some(mut process) = taken {
            process.terminate();
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MockLauncher / MockProcess  (test-only)
// ---------------------------------------------------------------------------

/// Test double that records launches and hands out [`MockProcess`] handles
/// without spawning anything.
#[cfg(test)]
pub struct MockLauncher {
    /// Credentials seen by `launch`, in order.
    pub launched_with: std::sync::Arc<Mutex<Vec<String>>>,
    /// Number of mock processes currently alive.
    pub live: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    fail_with: Option<LaunchError>,
}

#[cfg(test)]
impl MockLauncher {
    /// A launcher whose every `launch` succeeds.
    pub fn ok() -> Self {
        Self {
            launched_with: std::sync::Arc::new(Mutex::new(Vec::new())),
            live: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            fail_with: None,
        }
    }

    /// A launcher whose every `launch` fails with `error`.
    pub fn err(error: LaunchError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::ok()
        }
    }
}

#[cfg(test)]
impl EngineLauncher for MockLauncher {
    fn launch(
        &self,
        _script: &Path,
        credential: &str,
    ) -> Result<Box<dyn EngineProcess>, LaunchError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.launched_with.lock().unwrap().push(credential.into());
        self.live
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Box::new(MockProcess {
            alive: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
            live: std::sync::Arc::clone(&self.live),
            terminations: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }))
    }
}

/// Process handle counterpart to [`MockLauncher`].
#[cfg(test)]
pub struct MockProcess {
    pub alive: std::sync::Arc<std::sync::atomic::AtomicBool>,
    live: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    pub terminations: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
impl EngineProcess for MockProcess {
    fn is_alive(&mut self) -> bool {
        self.alive.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn terminate(&mut self) {
        self.terminations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.alive.swap(false, std::sync::atomic::Ordering::SeqCst) {
            self.live.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn script_path() -> std::path::PathBuf {
        std::path::PathBuf::from("engine.py")
    }

    // --- Supervisor with mocks ---

    #[test]
    fn ensure_running_launches_once_while_alive() {
        let launcher = MockLauncher::ok();
        let launched = std::sync::Arc::clone(&launcher.launched_with);
        let live = std::sync::Arc::clone(&launcher.live);

        let supervisor = Supervisor::new(Box::new(launcher));
        supervisor.ensure_running(&script_path(), "k1").unwrap();
        supervisor.ensure_running(&script_path(), "k1").unwrap();
        supervisor.ensure_running(&script_path(), "k1").unwrap();

        assert_eq!(launched.lock().unwrap().len(), 1);
        assert_eq!(live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ensure_running_relaunches_after_crash() {
        let launcher = MockLauncher::ok();
        let launched = std::sync::Arc::clone(&launcher.launched_with);
        let live = std::sync::Arc::clone(&launcher.live);

        let supervisor = Supervisor::new(Box::new(launcher));
        supervisor.ensure_running(&script_path(), "k1").unwrap();
        assert!(supervisor.is_alive());

        // Simulate an engine crash: the mock's live counter drops when the
        // process flips to dead.
        live.store(0, Ordering::SeqCst);
        {
            let mut guard = supervisor.process.lock().unwrap();
            // Downcast-free crash simulation: replace with a dead mock.
            *guard = Some(Box::new(MockProcess {
                alive: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
                live: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
                terminations: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            }));
        }

        supervisor.ensure_running(&script_path(), "k2").unwrap();
        assert_eq!(launched.lock().unwrap().len(), 2);
        assert_eq!(launched.lock().unwrap()[1], "k2");
    }

    #[test]
    fn terminate_is_idempotent_and_never_fails() {
        let launcher = MockLauncher::ok();
        let live = std::sync::Arc::clone(&launcher.live);

        let supervisor = Supervisor::new(Box::new(launcher));
        // Terminate before any launch is a no-op.
        supervisor.terminate();

        supervisor.ensure_running(&script_path(), "k1").unwrap();
        supervisor.terminate();
        supervisor.terminate();

        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(!supervisor.is_alive());
    }

    #[test]
    fn launch_error_propagates() {
        let launcher = MockLauncher::err(LaunchError::ScriptMissing("engine.py".into()));
        let supervisor = Supervisor::new(Box::new(launcher));

        let err = supervisor
            .ensure_running(&script_path(), "k1")
            .unwrap_err();
        assert!(matches!(err, LaunchError::ScriptMissing(_)));
        assert!(!supervisor.is_alive());
    }

    // --- ScriptLauncher ---

    #[test]
    fn launch_missing_script_returns_script_missing() {
        let launcher = ScriptLauncher::new("python", "ZHIPU_API_KEY", Duration::from_secs(2));
        let result = launcher.launch(Path::new("/nonexistent/engine.py"), "k1");
        assert!(matches!(result, Err(LaunchError::ScriptMissing(_))));
    }

    #[cfg(unix)]
    #[test]
    fn launch_missing_interpreter_returns_spawn_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let script = dir.path().join("engine.py");
        std::fs::write(&script, "print('hi')\n").unwrap();

        let launcher = ScriptLauncher::new(
            "definitely-not-an-interpreter",
            "ZHIPU_API_KEY",
            Duration::from_secs(2),
        );
        let result = launcher.launch(&script, "k1");
        assert!(matches!(result, Err(LaunchError::Spawn(_))));
    }

    /// A real child that exits on stdin EOF terminates within the grace
    /// period without being killed.
    #[cfg(unix)]
    #[test]
    fn terminate_real_child_gracefully() {
        let dir = tempfile::tempdir().expect("temp dir");
        let script = dir.path().join("engine.sh");
        // `cat` blocks until stdin closes, then exits 0.
        std::fs::write(&script, "cat > /dev/null\n").unwrap();

        let launcher = ScriptLauncher::new("sh", "ZHIPU_API_KEY", Duration::from_secs(5));
        let mut process = launcher.launch(&script, "k1").expect("launch");

        assert!(process.is_alive());
        let start = Instant::now();
        process.terminate();
        assert!(!process.is_alive());
        // Graceful path: well under the 5 s grace period.
        assert!(start.elapsed() < Duration::from_secs(5));

        // Second terminate is a no-op.
        process.terminate();
    }

    #[cfg(unix)]
    #[test]
    fn credential_reaches_child_environment() {
        let dir = tempfile::tempdir().expect("temp dir");
        let script = dir.path().join("engine.sh");
        let witness = dir.path().join("witness");
        std::fs::write(
            &script,
            format!("printf '%s' \"$ENGINE_KEY\" > {}\n", witness.display()),
        )
        .unwrap();

        let launcher = ScriptLauncher::new("sh", "ENGINE_KEY", Duration::from_secs(5));
        let mut process = launcher.launch(&script, "secret-k1").expect("launch");

        // Wait for the short-lived child to finish writing.
        let deadline = Instant::now() + Duration::from_secs(5);
        while process.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        let written = std::fs::read_to_string(&witness).expect("witness file");
        assert_eq!(written, "secret-k1");
    }
}
