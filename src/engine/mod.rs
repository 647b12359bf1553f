//! Engine process supervision.
//!
//! The translation engine is an external script run by an interpreter; this
//! module owns its lifecycle and nothing else — the stream that talks to it
//! lives in [`crate::session`].
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                Supervisor                          │
//! │                                                    │
//! │   ┌────────────────┐     ┌───────────────────┐     │
//! │   │ EngineLauncher │────▶│  EngineProcess    │     │
//! │   │ (trait)        │     │  (trait)          │     │
//! │   └────────────────┘     │  - is_alive       │     │
//! │     ScriptLauncher       │  - terminate      │     │
//! │     (interpreter+env)    └───────────────────┘     │
//! │                            ChildProcess            │
//! │                            (std::process::Child)   │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! At most one engine process is live per [`Supervisor`];
//! [`Supervisor::ensure_running`] is a no-op while one is alive.

pub mod supervisor;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use supervisor::{
    ChildProcess, EngineLauncher, EngineProcess, LaunchError, ScriptLauncher, Supervisor,
};

// test-only re-export so the session test modules can import the mocks
// without reaching into `supervisor` directly.
#[cfg(test)]
pub use supervisor::{MockLauncher, MockProcess};
