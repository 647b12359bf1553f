//! Streaming session — owns the engine process and the outbound stream.
//!
//! [`TranslationSession`] coordinates three failure domains: the engine
//! child process, the stream to it, and the capture pipeline feeding audio.
//! The capture pipeline must never stall on translation, so `send_audio`
//! only copies the frame into a small bounded channel; a dedicated writer
//! thread owns the connection and does the blocking sends
//! (the cpal-callback/worker-thread split, applied to a socket).
//!
//! # Lifecycle
//!
//! ```text
//! start(credential)
//!   ├─▶ Supervisor::ensure_running          [Starting]
//!   ├─▶ readiness poll: connect w/ backoff
//!   ├─▶ send ConfigMessage                  (exactly once per connection)
//!   └─▶ writer thread installed             [Connected]
//!
//! send_audio(frame) ──try_send──▶ writer thread ──▶ stream
//!   └─ on send failure: [Reconnecting], bounded reconnect task
//!        (3 attempts, 1s/2s/3s by default), exhaustion → [Disconnected]
//!
//! stop() ──▶ cancel reconnect, close stream, terminate engine  [Stopped]
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::TranslationConfig;
use crate::engine::{EngineLauncher, LaunchError, ScriptLauncher, Supervisor};

use super::protocol::ClientMessage;
use super::state::ConnectionState;
use super::transport::{Connection, Transport, TransportError, WsTransport};

/// Frames buffered towards the writer thread. Small on purpose: a stalled
/// writer should drop frames, not accumulate latency.
const AUDIO_QUEUE_DEPTH: usize = 8;

// ---------------------------------------------------------------------------
// SessionStartError
// ---------------------------------------------------------------------------

/// Failure of a `start` attempt. The caller decides whether to retry;
/// this layer does not.
#[derive(Debug, Error)]
pub enum SessionStartError {
    /// The engine process could not be launched.
    #[error("Engine launch failed: {0}")]
    Launch(#[from] LaunchError),

    /// The stream could not be connected or the handshake failed within
    /// the readiness budget.
    #[error("Stream connect failed: {0}")]
    Connect(#[from] TransportError),

    /// `stop` was called while `start` was still in flight.
    #[error("Session was stopped while starting")]
    Stopped,
}

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// One captured audio buffer, borrowed from the capture pipeline for the
/// duration of the `send_audio` call.
///
/// Only `bytes[..valid_len]` is meaningful; capture pipelines reuse large
/// buffers and report how much of the buffer each callback filled.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    pub bytes: &'a [u8],
    pub valid_len: usize,
}

impl<'a> AudioFrame<'a> {
    pub fn new(bytes: &'a [u8], valid_len: usize) -> Self {
        Self { bytes, valid_len }
    }
}

// ---------------------------------------------------------------------------
// SessionOptions
// ---------------------------------------------------------------------------

/// Runtime knobs for one session, normally derived from
/// [`TranslationConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Engine stream endpoint.
    pub endpoint: String,
    /// Engine script asset handed to the launcher.
    pub script: PathBuf,
    /// First readiness-poll backoff step.
    pub ready_poll_base: Duration,
    /// Readiness backoff ceiling.
    pub ready_poll_ceiling: Duration,
    /// Total readiness budget for one `start`.
    pub ready_deadline: Duration,
    /// Reconnect schedule: one delay per attempt.
    pub reconnect_delays: Vec<Duration>,
}

impl SessionOptions {
    pub fn from_config(config: &TranslationConfig) -> Self {
        Self {
            endpoint: config.stream.endpoint.clone(),
            script: config.engine.resolved_script_path(),
            ready_poll_base: config.stream.ready_poll_base(),
            ready_poll_ceiling: config.stream.ready_poll_ceiling(),
            ready_deadline: config.stream.ready_deadline(),
            reconnect_delays: config.reconnect.delays(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal shared state
// ---------------------------------------------------------------------------

enum WriterCmd {
    Frame(Vec<u8>),
    Close,
}

struct WriterHandle {
    tx: SyncSender<WriterCmd>,
    thread: std::thread::JoinHandle<()>,
}

struct ReconnectHandle {
    cancel: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

struct SessionShared {
    options: SessionOptions,
    transport: Arc<dyn Transport>,
    supervisor: Supervisor,
    state: Mutex<ConnectionState>,
    /// Last credential passed to `start`; reconnect attempts reuse it
    /// rather than reading anything back from the process environment.
    credential: Mutex<Option<String>>,
    writer: Mutex<Option<WriterHandle>>,
    reconnect: Mutex<Option<ReconnectHandle>>,
    /// Runtime handle captured in `start` so the writer thread can spawn
    /// the reconnect task from outside the runtime.
    runtime: Mutex<Option<tokio::runtime::Handle>>,
    disposed: AtomicBool,
}

// ---------------------------------------------------------------------------
// TranslationSession
// ---------------------------------------------------------------------------

/// The client-side session manager for one activation of the translation
/// feature.
///
/// Exactly one instance exists per activation; `start` builds it up,
/// `stop` tears it down, and dropping it releases everything exactly once.
pub struct TranslationSession {
    shared: Arc<SessionShared>,
}

impl TranslationSession {
    pub fn new(
        options: SessionOptions,
        launcher: Box<dyn EngineLauncher>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                options,
                transport,
                supervisor: Supervisor::new(launcher),
                state: Mutex::new(ConnectionState::Disconnected),
                credential: Mutex::new(None),
                writer: Mutex::new(None),
                reconnect: Mutex::new(None),
                runtime: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Production wiring: script launcher + WebSocket transport.
    pub fn from_config(config: &TranslationConfig) -> Self {
        Self::new(
            SessionOptions::from_config(config),
            Box::new(ScriptLauncher::from_config(&config.engine)),
            Arc::new(WsTransport),
        )
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    /// `true` only while the stream is usable for audio.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Launch the engine, connect the stream and send the config handshake.
    ///
    /// No-op when already Connected (or while a start/reconnect is in
    /// flight). On failure the session is left Disconnected with no engine
    /// process behind; the caller decides whether to retry.
    pub async fn start(&self, credential: &str) -> Result<(), SessionStartError> {
        {
            let mut st = self.shared.state.lock().unwrap();
            match *st {
                ConnectionState::Connected
                | ConnectionState::Starting
                | ConnectionState::Reconnecting => return Ok(()),
                ConnectionState::Disconnected | ConnectionState::Stopped => {
                    *st = ConnectionState::Starting;
                }
            }
        }

        *self.shared.runtime.lock().unwrap() = Some(tokio::runtime::Handle::current());
        *self.shared.credential.lock().unwrap() = Some(credential.to_owned());

        // Engine first: the stream has nothing to connect to without it.
        let launch_shared = Arc::clone(&self.shared);
        let launch_credential = credential.to_owned();
        let launched = tokio::task::spawn_blocking(move || {
            let script = launch_shared.options.script.clone();
            launch_shared
                .supervisor
                .ensure_running(&script, &launch_credential)
        })
        .await;

        match launched {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.mark_start_failed().await;
                return Err(SessionStartError::Launch(e));
            }
            Err(e) => {
                self.mark_start_failed().await;
                return Err(SessionStartError::Connect(TransportError::Connect(
                    format!("launch task failed: {e}"),
                )));
            }
        }

        match connect_with_readiness_poll(&self.shared, credential).await {
            Ok(()) => {
                let mut st = self.shared.state.lock().unwrap();
                if *st == ConnectionState::Starting {
                    *st = ConnectionState::Connected;
                    log::info!("session: connected to {}", self.shared.options.endpoint);
                    Ok(())
                } else {
                    // Stopped while connecting — undo the connection.
                    drop(st);
                    close_writer(&self.shared);
                    Err(SessionStartError::Stopped)
                }
            }
            Err(e) => {
                self.mark_start_failed().await;
                Err(e)
            }
        }
    }

    /// Forward one audio frame, best-effort.
    ///
    /// Never blocks and never fails: when the session is not connected, the
    /// writer is saturated, or `valid_len` is out of bounds, the frame is
    /// dropped. Call from the capture context at its own cadence.
    pub fn send_audio(&self, frame: AudioFrame<'_>) {
        if !self.shared.state.lock().unwrap().is_connected() {
            return;
        }

        let Some(valid) = frame.bytes.get(..frame.valid_len) else {
            log::warn!(
                "session: frame valid_len {} exceeds buffer of {} bytes; dropped",
                frame.valid_len,
                frame.bytes.len()
            );
            return;
        };

        let guard = self.shared.writer.lock().unwrap();
        let Some(writer) = guard.as_ref() else {
            return;
        };
        match writer.tx.try_send(WriterCmd::Frame(valid.to_vec())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::debug!("session: writer saturated; frame dropped");
            }
            // Writer died between the state check and here; the reconnect
            // sequence owns recovery.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Tear the session down: cancel reconnects, close the stream with a
    /// normal-closure code, terminate the engine.
    ///
    /// Always safe to call, including when never started or already
    /// stopped. Teardown failures are logged, never raised.
    pub async fn stop(&self) {
        begin_stop(&self.shared);
        let shared = Arc::clone(&self.shared);
        let _ = tokio::task::spawn_blocking(move || finish_stop(&shared)).await;
        log::info!("session: stopped");
    }

    /// Release all resources exactly once.
    ///
    /// Equivalent to `stop` for a session that is still running; a second
    /// call (or a call after `stop`) is a no-op. Blocking — call it from a
    /// non-async context, or after `stop().await`.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        begin_stop(&self.shared);
        finish_stop(&self.shared);
    }

    async fn mark_start_failed(&self) {
        {
            let mut st = self.shared.state.lock().unwrap();
            if *st == ConnectionState::Starting {
                *st = ConnectionState::Disconnected;
            }
        }
        // Disconnected means no engine process is held.
        let shared = Arc::clone(&self.shared);
        let _ = tokio::task::spawn_blocking(move || shared.supervisor.terminate()).await;
    }
}

impl Drop for TranslationSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for TranslationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Connect path
// ---------------------------------------------------------------------------

/// Poll the engine endpoint with exponential backoff until it accepts the
/// connection or the readiness budget runs out.
///
/// The engine needs a moment after launch to open its listener; a bounded
/// poll tracks actual readiness instead of guessing with a fixed sleep.
async fn connect_with_readiness_poll(
    shared: &Arc<SessionShared>,
    credential: &str,
) -> Result<(), SessionStartError> {
    let deadline = Instant::now() + shared.options.ready_deadline;
    let mut backoff = shared.options.ready_poll_base;

    loop {
        if *shared.state.lock().unwrap() != ConnectionState::Starting {
            return Err(SessionStartError::Stopped);
        }

        match connect_once(shared, credential).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if Instant::now() + backoff > deadline {
                    return Err(SessionStartError::Connect(e));
                }
                log::debug!("session: engine not ready ({e}); retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(shared.options.ready_poll_ceiling);
            }
        }
    }
}

/// One connect attempt: open the stream, send the config handshake, hand
/// the connection to a fresh writer thread.
async fn connect_once(
    shared: &Arc<SessionShared>,
    credential: &str,
) -> Result<(), TransportError> {
    let hello = ClientMessage::config(credential)
        .encode()
        .map_err(|e| TransportError::Send(e.to_string()))?;

    let transport = Arc::clone(&shared.transport);
    let endpoint = shared.options.endpoint.clone();

    let conn = tokio::task::spawn_blocking(
        move || -> Result<Box<dyn Connection>, TransportError> {
            let mut conn = transport.connect(&endpoint)?;
            conn.send_text(&hello)?;
            Ok(conn)
        },
    )
    .await
    .map_err(|e| TransportError::Connect(format!("connect task failed: {e}")))??;

    install_writer(shared, conn)
}

fn install_writer(
    shared: &Arc<SessionShared>,
    conn: Box<dyn Connection>,
) -> Result<(), TransportError> {
    let (tx, rx) = sync_channel::<WriterCmd>(AUDIO_QUEUE_DEPTH);

    let writer_shared = Arc::clone(shared);
    let thread = std::thread::Builder::new()
        .name("session-writer".into())
        .spawn(move || run_writer(conn, rx, writer_shared))
        .map_err(|e| TransportError::Connect(format!("writer thread spawn failed: {e}")))?;

    let previous = {
        shared
            .writer
            .lock()
            .unwrap()
            .replace(WriterHandle { tx, thread })
    };
    if let Some(WriterHandle { tx, thread }) = previous {
        let _ = tx.try_send(WriterCmd::Close);
        drop(tx);
        // Detached; it exits once the channel drains.
        drop(thread);
    }
    Ok(())
}

/// Writer thread body: owns the connection, drains the frame channel.
///
/// Exits on `Close`, on channel disconnect (session dropped) or on the
/// first send failure, which kicks off the reconnect sequence.
fn run_writer(
    mut conn: Box<dyn Connection>,
    rx: Receiver<WriterCmd>,
    shared: Arc<SessionShared>,
) {
    loop {
        match rx.recv() {
            Ok(WriterCmd::Frame(bytes)) => {
                if let Err(e) = conn.send_binary(&bytes) {
                    log::warn!("session: audio transmission failed: {e}");
                    on_send_failure(&shared);
                    return;
                }
            }
            Ok(WriterCmd::Close) | Err(_) => {
                conn.close();
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reconnect path
// ---------------------------------------------------------------------------

/// Runs on the writer thread after a failed send: flip to Reconnecting and
/// schedule the bounded reconnect task on the runtime.
fn on_send_failure(shared: &Arc<SessionShared>) {
    {
        let mut st = shared.state.lock().unwrap();
        if *st != ConnectionState::Connected {
            // Already stopping or reconnecting; nothing to do.
            return;
        }
        *st = ConnectionState::Reconnecting;
    }

    // Discard the dead writer's handle. This runs on the writer thread
    // itself, so the handle must be dropped, never joined.
    let _ = { shared.writer.lock().unwrap().take() };

    let runtime = { shared.runtime.lock().unwrap().clone() };
    let Some(runtime) = runtime else {
        *shared.state.lock().unwrap() = ConnectionState::Disconnected;
        return;
    };

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    let task = runtime.spawn(run_reconnect(Arc::clone(shared), cancel_rx));
    *shared.reconnect.lock().unwrap() = Some(ReconnectHandle {
        cancel: cancel_tx,
        task,
    });
}

/// Bounded reconnect: one delayed attempt per schedule entry, reusing the
/// credential retained at `start`. Exhaustion leaves the session
/// Disconnected with the engine terminated; frames are dropped until the
/// caller starts the session again.
async fn run_reconnect(
    shared: Arc<SessionShared>,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    let delays = shared.options.reconnect_delays.clone();
    let total = delays.len();
    let credential = shared.credential.lock().unwrap().clone().unwrap_or_default();

    for (attempt, delay) in delays.into_iter().enumerate() {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.changed() => return,
        }
        if *cancel.borrow() || *shared.state.lock().unwrap() != ConnectionState::Reconnecting {
            return;
        }

        log::info!("session: reconnect attempt {}/{}", attempt + 1, total);
        match connect_once(&shared, &credential).await {
            Ok(()) => {
                let mut st = shared.state.lock().unwrap();
                if *st == ConnectionState::Reconnecting {
                    *st = ConnectionState::Connected;
                    log::info!("session: reconnected");
                } else {
                    // Stopped while the attempt was in flight — undo it.
                    drop(st);
                    close_writer(&shared);
                }
                return;
            }
            Err(e) => {
                log::warn!("session: reconnect attempt {} failed: {e}", attempt + 1);
            }
        }
    }

    log::warn!("session: reconnect exhausted after {total} attempts; staying disconnected");
    {
        let mut st = shared.state.lock().unwrap();
        if *st != ConnectionState::Reconnecting {
            return;
        }
        *st = ConnectionState::Disconnected;
    }
    let shared_term = Arc::clone(&shared);
    let _ = tokio::task::spawn_blocking(move || shared_term.supervisor.terminate()).await;
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

/// Non-blocking half of teardown: mark Stopped and cancel the reconnect
/// task so no attempt survives past this point.
fn begin_stop(shared: &Arc<SessionShared>) {
    *shared.state.lock().unwrap() = ConnectionState::Stopped;

    let reconnect = { shared.reconnect.lock().unwrap().take() };
    if let Some(ReconnectHandle { cancel, task }) = reconnect {
        let _ = cancel.send(true);
        task.abort();
    }
}

/// Blocking half of teardown: close the stream and terminate the engine.
fn finish_stop(shared: &Arc<SessionShared>) {
    close_writer(shared);
    shared.supervisor.terminate();
}

/// Ask the writer to close the stream normally, then reap the thread.
fn close_writer(shared: &Arc<SessionShared>) {
    let writer = { shared.writer.lock().unwrap().take() };
    if let Some(WriterHandle { tx, thread }) = writer {
        let _ = tx.try_send(WriterCmd::Close);
        // Dropping the sender unblocks the writer even if the channel was
        // full and Close could not be queued.
        drop(tx);
        if thread.join().is_err() {
            log::warn!("session: writer thread panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
