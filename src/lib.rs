//! Live-translation client core.
//!
//! Streams live microphone audio from a capture application to an external
//! speech-translation engine (a separate process this crate supervises but
//! does not implement) and exposes the returned translated text to a
//! polling overlay renderer.
//!
//! # Data flow
//!
//! ```text
//! capture pipeline ──(bytes, valid_len)──▶ session ──binary frames──▶ engine
//!                                            ▲                         │
//!                                   supervises│process      translation│updates
//!                                            │                         ▼
//! overlay renderer ◀──getText──  overlay  ◀──  feed  ◀──────────── broadcast
//! ```
//!
//! # Modules
//!
//! * [`config`]  — settings, TOML persistence, platform paths.
//! * [`engine`]  — engine process supervision (launch / liveness / terminate).
//! * [`session`] — the streaming session: handshake, audio forwarding,
//!   bounded reconnect.
//! * [`feed`]    — read-only subscription delivering translation updates.
//! * [`overlay`] — pull-based text source the renderer polls every frame.
//!
//! The capture pipeline never blocks on translation: audio forwarding is
//! best-effort and every degraded state renders as a blank overlay rather
//! than an error.

pub mod config;
pub mod engine;
pub mod feed;
pub mod overlay;
pub mod session;
