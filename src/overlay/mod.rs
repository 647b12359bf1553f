//! Overlay text source — the seam the external renderer consumes.
//!
//! The renderer polls [`TextSource::text`] once per rendered frame and
//! paints the returned string with no further processing. The call never
//! blocks on I/O and never fails; "no translation available" is the empty
//! string.

use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// OverlayState
// ---------------------------------------------------------------------------

/// The most recent translated text, shared between the feed's reader
/// thread and the render loop.
///
/// Last-write-wins: older values are overwritten, never queued. Readers
/// always see a complete string — the mutex rules out torn reads — and the
/// critical sections are a single clone/assign, so neither side can stall
/// the other behind I/O.
#[derive(Debug, Default)]
pub struct OverlayState {
    current: Mutex<String>,
}

impl OverlayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current text.
    pub fn set_text(&self, text: impl Into<String>) {
        *self.current.lock().unwrap() = text.into();
    }

    /// Reset to "no translation available".
    pub fn clear(&self) {
        self.current.lock().unwrap().clear();
    }

    /// The current text at the instant of the call.
    pub fn text(&self) -> String {
        self.current.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// TextSource
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface the overlay renderer polls.
pub trait TextSource: Send + Sync {
    /// The latest available translated text, or `""`.
    fn text(&self) -> String;
}

// Compile-time assertion: Box<dyn TextSource> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn TextSource>) {}
};

/// [`TextSource`] backed by a shared [`OverlayState`].
#[derive(Debug, Clone)]
pub struct OverlayTextSource {
    state: Arc<OverlayState>,
}

impl OverlayTextSource {
    pub fn new(state: Arc<OverlayState>) -> Self {
        Self { state }
    }
}

impl TextSource for OverlayTextSource {
    fn text(&self) -> String {
        self.state.text()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
