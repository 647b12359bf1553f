//! Streaming session module.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  TranslationSession                       │
//! │                                                           │
//! │  capture ──send_audio──▶ bounded queue ──▶ writer thread  │
//! │                                              │            │
//! │  start/stop (async)                          ▼            │
//! │    │                                 Connection (trait)   │
//! │    ├─▶ Supervisor (engine process)      WsTransport       │
//! │    └─▶ readiness poll + handshake                         │
//! │                                                           │
//! │  ConnectionState: Disconnected / Starting / Connected /   │
//! │                   Reconnecting / Stopped                  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use live_translate::config::TranslationConfig;
//! use live_translate::session::{AudioFrame, TranslationSession};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TranslationConfig::load().unwrap();
//!     let session = TranslationSession::from_config(&config);
//!
//!     session.start(&config.api_key).await.unwrap();
//!
//!     // From the capture context, at its own cadence:
//!     let buffer = [0u8; 3200];
//!     session.send_audio(AudioFrame::new(&buffer, 3200));
//!
//!     session.stop().await;
//! }
//! ```

pub mod manager;
pub mod protocol;
pub mod state;
pub mod transport;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use manager::{AudioFrame, SessionOptions, SessionStartError, TranslationSession};
pub use protocol::ClientMessage;
pub use state::ConnectionState;
pub use transport::{Connection, Transport, TransportError, WsTransport};

// test-only re-export so other modules' tests can script the transport
// without reaching into `transport::mock`.
#[cfg(test)]
pub use transport::{MockTransport, SentItem};
