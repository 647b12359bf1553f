//! Translation feed — the read-only subscription to the engine's
//! broadcast endpoint.
//!
//! A dedicated reader thread decodes each inbound message into a
//! [`FeedMessage`] and updates the shared [`OverlayState`]; the overlay
//! renderer polls the state through [`OverlayTextSource`] at its own
//! cadence. Anything that is not a well-formed update collapses to blank
//! text — a parse error must never reach the render loop.
//!
//! Unlike the streaming session, the feed never reconnects on its own: a
//! dropped connection blanks the overlay and stays closed until the caller
//! attaches a fresh feed on the next activation.
//!
//! # Shutdown caveat
//!
//! The reader thread blocks inside `receive_text`, which has no interrupt
//! API on the production transport. Dropping a [`TranslationFeed`] sets a
//! stop flag and detaches the thread; it exits on the next inbound message
//! or when the engine closes the connection (which engine teardown does).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use crate::overlay::{OverlayState, OverlayTextSource};
use crate::session::transport::{Connection, Transport, TransportError};

// ---------------------------------------------------------------------------
// FeedMessage
// ---------------------------------------------------------------------------

/// One decoded inbound message.
///
/// The explicit `Unparseable` variant makes "decode failed" an ordinary
/// value the reader maps to blank text, instead of an error that would
/// need propagating towards the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// A well-formed update; `None` means the engine cleared the text.
    Update(Option<String>),
    /// Anything that did not decode as an update.
    Unparseable,
}

#[derive(Debug, Deserialize)]
struct TranslationUpdate {
    translation: Option<String>,
}

/// Decode one inbound text message.
pub fn decode_update(raw: &str) -> FeedMessage {
    match serde_json::from_str::<TranslationUpdate>(raw) {
        Ok(update) => FeedMessage::Update(update.translation),
        Err(_) => FeedMessage::Unparseable,
    }
}

// ---------------------------------------------------------------------------
// TranslationFeed
// ---------------------------------------------------------------------------

/// Owns the broadcast connection and the [`OverlayState`] it feeds.
pub struct TranslationFeed {
    state: Arc<OverlayState>,
    stop: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl TranslationFeed {
    /// Attach to the engine's broadcast endpoint.
    ///
    /// Best-effort: when the connection cannot be established the failure
    /// is swallowed (logged at warn) and the overlay stays perpetually
    /// blank — translation health must never take the capture down.
    pub fn connect(transport: &dyn Transport, endpoint: &str) -> Self {
        let state = Arc::new(OverlayState::new());
        let stop = Arc::new(AtomicBool::new(false));

        let reader = match transport.connect(endpoint) {
            Ok(conn) => {
                let thread_state = Arc::clone(&state);
                let thread_stop = Arc::clone(&stop);
                match std::thread::Builder::new()
                    .name("translation-feed".into())
                    .spawn(move || run_feed(conn, thread_state, thread_stop))
                {
                    Ok(handle) => {
                        log::info!("feed: attached to {endpoint}");
                        Some(handle)
                    }
                    Err(e) => {
                        log::warn!("feed: reader thread spawn failed: {e}");
                        None
                    }
                }
            }
            Err(e) => {
                log::warn!("feed: connect to {endpoint} failed ({e}); overlay stays blank");
                None
            }
        };

        Self {
            state,
            stop,
            reader,
        }
    }

    /// The shared state this feed updates.
    pub fn overlay_state(&self) -> Arc<OverlayState> {
        Arc::clone(&self.state)
    }

    /// A text source for the overlay renderer.
    pub fn text_source(&self) -> OverlayTextSource {
        OverlayTextSource::new(Arc::clone(&self.state))
    }

    /// `true` while the reader thread is running.
    pub fn is_attached(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TranslationFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Detach — see the module-level shutdown caveat.
        self.reader.take();
    }
}

impl std::fmt::Debug for TranslationFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationFeed")
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

/// Reader thread body: decode updates into the overlay state until the
/// connection dies or the feed is dropped.
fn run_feed(mut conn: Box<dyn Connection>, state: Arc<OverlayState>, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::SeqCst) {
            conn.close();
            return;
        }
        match conn.receive_text() {
            Ok(Some(raw)) => match decode_update(&raw) {
                FeedMessage::Update(Some(text)) => state.set_text(text),
                FeedMessage::Update(None) => state.clear(),
                FeedMessage::Unparseable => {
                    log::debug!("feed: unparseable update; blanking overlay");
                    state.clear();
                }
            },
            // Non-text frame — not an update, skip.
            Ok(None) => {}
            Err(TransportError::Closed) => {
                log::info!("feed: connection closed");
                state.clear();
                return;
            }
            Err(e) => {
                log::warn!("feed: receive failed: {e}");
                state.clear();
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::TextSource;
    use crate::session::MockTransport;
    use std::time::{Duration, Instant};

    // --- decode_update ---

    #[test]
    fn decodes_translation_string() {
        assert_eq!(
            decode_update(r#"{"translation":"bonjour"}"#),
            FeedMessage::Update(Some("bonjour".into()))
        );
    }

    #[test]
    fn decodes_null_translation_as_clear() {
        assert_eq!(
            decode_update(r#"{"translation":null}"#),
            FeedMessage::Update(None)
        );
    }

    #[test]
    fn missing_field_decodes_as_clear() {
        assert_eq!(decode_update("{}"), FeedMessage::Update(None));
    }

    #[test]
    fn extra_fields_are_tolerated() {
        assert_eq!(
            decode_update(r#"{"translation":"hi","latency_ms":42}"#),
            FeedMessage::Update(Some("hi".into()))
        );
    }

    #[test]
    fn malformed_input_is_unparseable() {
        assert_eq!(decode_update("not json"), FeedMessage::Unparseable);
        assert_eq!(decode_update(""), FeedMessage::Unparseable);
        assert_eq!(decode_update("[1,2,3]"), FeedMessage::Unparseable);
        assert_eq!(
            decode_update(r#"{"translation":42}"#),
            FeedMessage::Unparseable
        );
    }

    // --- TranslationFeed against the scripted transport ---

    fn wait_for_text(feed: &TranslationFeed, expected: &str) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let text = feed.overlay_state().text();
            if text == expected {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {expected:?}, last saw {text:?}"
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn updates_flow_into_overlay_state() {
        let transport = MockTransport::new();
        transport.set_keep_open(true);

        let feed = TranslationFeed::connect(&transport, "ws://mock");
        assert!(feed.is_attached());
        assert_eq!(feed.text_source().text(), "");

        transport.push_incoming(r#"{"translation":"bonjour"}"#);
        wait_for_text(&feed, "bonjour");

        transport.push_incoming(r#"{"translation":"le monde"}"#);
        wait_for_text(&feed, "le monde");
    }

    #[test]
    fn null_translation_blanks_overlay() {
        let transport = MockTransport::new();
        transport.set_keep_open(true);

        let feed = TranslationFeed::connect(&transport, "ws://mock");
        transport.push_incoming(r#"{"translation":"bonjour"}"#);
        wait_for_text(&feed, "bonjour");

        transport.push_incoming(r#"{"translation":null}"#);
        wait_for_text(&feed, "");
    }

    #[test]
    fn malformed_update_blanks_overlay_without_panicking() {
        let transport = MockTransport::new();
        transport.set_keep_open(true);

        let feed = TranslationFeed::connect(&transport, "ws://mock");
        transport.push_incoming(r#"{"translation":"bonjour"}"#);
        wait_for_text(&feed, "bonjour");

        transport.push_incoming("not json");
        wait_for_text(&feed, "");
    }

    #[test]
    fn peer_close_blanks_overlay_and_detaches() {
        let transport = MockTransport::new();
        transport.set_keep_open(true);

        let feed = TranslationFeed::connect(&transport, "ws://mock");
        transport.push_incoming(r#"{"translation":"bonjour"}"#);
        wait_for_text(&feed, "bonjour");

        // Peer closes; no reconnect is attempted.
        transport.set_keep_open(false);
        wait_for_text(&feed, "");

        let deadline = Instant::now() + Duration::from_secs(2);
        while feed.is_attached() {
            assert!(Instant::now() < deadline, "reader did not exit");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            transport.attempts.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn failed_connect_is_swallowed_and_text_stays_blank() {
        let transport = MockTransport::new();
        transport.refuse_next_connects(1);

        let feed = TranslationFeed::connect(&transport, "ws://mock");
        assert!(!feed.is_attached());
        assert_eq!(feed.text_source().text(), "");
    }
}
