//! Stream transport trait and implementations.
//!
//! [`Transport`] / [`Connection`] are the seam between the session logic and
//! the wire. [`WsTransport`] is the production implementation over a local
//! WebSocket; `MockTransport` (under `#[cfg(test)]`) is a scriptable double
//! that records traffic and injects failures.
//!
//! All methods are blocking — callers run them on a dedicated thread or via
//! `tokio::task::spawn_blocking`, never on the capture or render contexts.

use std::net::TcpStream;

use thiserror::Error;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::Message;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// All errors that can arise on the engine stream.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Sending a message failed; the connection is no longer usable.
    #[error("Send failed: {0}")]
    Send(String),

    /// Receiving a message failed; the connection is no longer usable.
    #[error("Receive failed: {0}")]
    Receive(String),

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    Closed,
}

// ---------------------------------------------------------------------------
// Transport / Connection traits
// ---------------------------------------------------------------------------

/// An established duplex stream to the engine.
///
/// Implementations must be `Send` so a connection can be handed to the
/// writer thread.
pub trait Connection: Send {
    /// Send one text message.
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Send one binary message.
    fn send_binary(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Block until the next message arrives.
    ///
    /// Returns `Ok(Some(text))` for a text message, `Ok(None)` for any
    /// non-text frame (which callers skip), `Err(TransportError::Closed)`
    /// once the peer has closed.
    fn receive_text(&mut self) -> Result<Option<String>, TransportError>;

    /// Close with a normal-closure code. Best-effort: errors are swallowed.
    fn close(&mut self);
}

/// Connects streams to the engine.
pub trait Transport: Send + Sync {
    /// Open a connection to `endpoint` (e.g. `ws://127.0.0.1:8765`).
    fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError>;
}

// Compile-time assertion: the trait objects must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn Transport>, _: Box<dyn Connection>) {}
};

// ---------------------------------------------------------------------------
// WsTransport / WsConnection
// ---------------------------------------------------------------------------

/// Production transport over `tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (socket, _response) =
            tungstenite::connect(endpoint).map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(WsConnection { socket }))
    }
}

/// WebSocket connection over a plain local TCP stream.
pub struct WsConnection {
    socket: tungstenite::WebSocket<MaybeTlsStream<TcpStream>>,
}

impl Connection for WsConnection {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text.to_owned().into()))
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn send_binary(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send(Message::Binary(bytes.to_vec().into()))
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn receive_text(&mut self) -> Result<Option<String>, TransportError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text.as_str().to_owned())),
            Ok(Message::Close(_)) => Err(TransportError::Closed),
            // Binary / ping / pong frames are not translation updates.
            Ok(_) => Ok(None),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Err(TransportError::Closed)
            }
            Err(e) => Err(TransportError::Receive(e.to_string())),
        }
    }

    fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if let Err(e) = self.socket.close(Some(frame)) {
            log::debug!("transport: close failed: {e}");
        }
        // Flush so the close frame actually leaves before the socket drops.
        let _ = self.socket.flush();
    }
}

// ---------------------------------------------------------------------------
// MockTransport / MockConnection  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::{MockTransport, SentItem};

#[cfg(test)]
mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    /// One recorded outbound item, across all connections in order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum SentItem {
        Text(String),
        Binary(Vec<u8>),
        Closed,
    }

    /// Scriptable transport double.
    ///
    /// All handed-out connections share the same recording buffers, so a
    /// test sees the traffic of an entire reconnect sequence in order.
    #[derive(Default)]
    pub struct MockTransport {
        /// Successful connects so far.
        pub connects: Arc<AtomicUsize>,
        /// All connect attempts, refused ones included.
        pub attempts: Arc<AtomicUsize>,
        /// Instants of all connect attempts (for delay-schedule assertions).
        pub attempt_times: Arc<Mutex<Vec<Instant>>>,
        /// Number of upcoming connect attempts to refuse.
        pub refuse_connects: Arc<AtomicUsize>,
        /// Number of upcoming sends to fail.
        pub fail_sends: Arc<AtomicUsize>,
        /// Everything sent on any connection, in order.
        pub sent: Arc<Mutex<Vec<SentItem>>>,
        /// Scripted inbound text messages for `receive_text`.
        pub incoming: Arc<Mutex<VecDeque<String>>>,
        /// When `true`, `receive_text` waits for more input on an empty
        /// queue instead of reporting the connection closed.
        pub keep_open: Arc<AtomicBool>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Refuse the next `n` connect attempts.
        pub fn refuse_next_connects(&self, n: usize) {
            self.refuse_connects.store(n, Ordering::SeqCst);
        }

        /// Fail the next `n` sends (text or binary).
        pub fn fail_next_sends(&self, n: usize) {
            self.fail_sends.store(n, Ordering::SeqCst);
        }

        /// Queue an inbound text message.
        pub fn push_incoming(&self, message: impl Into<String>) {
            self.incoming.lock().unwrap().push_back(message.into());
        }

        /// Keep connections readable while the inbound queue is empty.
        /// Flip back to `false` to simulate the peer closing.
        pub fn set_keep_open(&self, open: bool) {
            self.keep_open.store(open, Ordering::SeqCst);
        }

        /// Snapshot of everything sent so far.
        pub fn sent_items(&self) -> Vec<SentItem> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        fn connect(&self, _endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.attempt_times.lock().unwrap().push(Instant::now());

            let remaining = self.refuse_connects.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != usize::MAX {
                    self.refuse_connects.store(remaining - 1, Ordering::SeqCst);
                }
                return Err(TransportError::Connect("connection refused".into()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                fail_sends: Arc::clone(&self.fail_sends),
                sent: Arc::clone(&self.sent),
                incoming: Arc::clone(&self.incoming),
                keep_open: Arc::clone(&self.keep_open),
            }))
        }
    }

    struct MockConnection {
        fail_sends: Arc<AtomicUsize>,
        sent: Arc<Mutex<Vec<SentItem>>>,
        incoming: Arc<Mutex<VecDeque<String>>>,
        keep_open: Arc<AtomicBool>,
    }

    impl MockConnection {
        fn take_send_failure(&self) -> bool {
            let remaining = self.fail_sends.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_sends.store(remaining - 1, Ordering::SeqCst);
                true
            } else {
                false
            }
        }
    }

    impl Connection for MockConnection {
        fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
            if self.take_send_failure() {
                return Err(TransportError::Send("scripted failure".into()));
            }
            self.sent.lock().unwrap().push(SentItem::Text(text.into()));
            Ok(())
        }

        fn send_binary(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            if self.take_send_failure() {
                return Err(TransportError::Send("scripted failure".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push(SentItem::Binary(bytes.to_vec()));
            Ok(())
        }

        fn receive_text(&mut self) -> Result<Option<String>, TransportError> {
            loop {
                if let Some(message) = self.incoming.lock().unwrap().pop_front() {
                    return Ok(Some(message));
                }
                if !self.keep_open.load(Ordering::SeqCst) {
                    return Err(TransportError::Closed);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        fn close(&mut self) {
            self.sent.lock().unwrap().push(SentItem::Closed);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
