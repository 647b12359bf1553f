//! Session connection state machine.
//!
//! [`ConnectionState`] drives the streaming session. The capture pipeline
//! reads it on every `send_audio` call, so transitions are kept behind a
//! mutex with short critical sections — readers always observe a complete
//! value, never a torn one.

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// States of the streaming session.
///
/// The state machine transitions are:
///
/// ```text
/// Disconnected ──start──▶ Starting
///                          ──launch + connect + config ok──▶ Connected
///                          ──any step fails──▶ Disconnected
/// Connected ──send failure──▶ Reconnecting
///                             ──an attempt succeeds──▶ Connected
///                             ──attempts exhausted──▶ Disconnected
/// any state ──stop──▶ Stopped
/// Stopped ──start──▶ Starting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No stream and no engine process; `send_audio` drops frames.
    Disconnected,

    /// `start` is launching the engine and polling for stream readiness.
    Starting,

    /// Stream is open and the config handshake has been sent.
    Connected,

    /// A transmission failed; the bounded reconnect sequence is running.
    Reconnecting,

    /// `stop` was called; all resources are released or being released.
    Stopped,
}

impl ConnectionState {
    /// Returns `true` only while the stream is usable for audio.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// A short human-readable label suitable for status display.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Starting => "Starting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Stopped => "Stopped",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Starting.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert!(!ConnectionState::Stopped.is_connected());
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(ConnectionState::Disconnected.label(), "Disconnected");
        assert_eq!(ConnectionState::Starting.label(), "Starting");
        assert_eq!(ConnectionState::Connected.label(), "Connected");
        assert_eq!(ConnectionState::Reconnecting.label(), "Reconnecting");
        assert_eq!(ConnectionState::Stopped.label(), "Stopped");
    }

    #[test]
    fn default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
