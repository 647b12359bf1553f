//! Demo client — live translation without the host capture app.
//!
//! Reads raw PCM from stdin as a stand-in capture pipeline, streams it to
//! the engine, and prints every translation update to stdout as the
//! "overlay". Useful for exercising the whole stack end-to-end:
//!
//! ```text
//! arecord -f S16_LE -r 16000 -c 1 -t raw | live-translate
//! ```
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`TranslationConfig`] from disk (returns default on first run).
//! 3. Create the tokio runtime (multi-thread, 2 workers).
//! 4. `start` the session — engine launch, readiness poll, handshake.
//! 5. Attach the translation feed and spawn the overlay printer thread.
//! 6. Forward stdin chunks as audio frames until EOF.
//! 7. `stop` the session.

use std::io::Read;
use std::time::Duration;

use live_translate::{
    config::TranslationConfig,
    feed::TranslationFeed,
    overlay::TextSource,
    session::{AudioFrame, TranslationSession, WsTransport},
};

/// 100 ms of 16 kHz mono s16le per frame.
const FRAME_BYTES: usize = 3_200;

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("live-translate demo client starting up");

    // 2. Configuration
    let config = TranslationConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        TranslationConfig::default()
    });

    if !config.enabled {
        anyhow::bail!("translation is disabled — set `enabled = true` in settings.toml");
    }
    if config.api_key.is_empty() {
        log::warn!("api_key is empty; the engine will likely reject the config handshake");
    }

    // 3. Tokio runtime (session orchestration only; audio stays on this thread)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    // 4. Session
    let session = TranslationSession::from_config(&config);
    rt.block_on(session.start(&config.api_key))?;
    log::info!("session connected; forwarding stdin audio");

    // 5. Feed + overlay printer
    let feed = TranslationFeed::connect(&WsTransport, &config.stream.feed_endpoint);
    let overlay = feed.text_source();

    std::thread::Builder::new()
        .name("overlay-printer".into())
        .spawn(move || {
            let mut last = String::new();
            loop {
                std::thread::sleep(Duration::from_millis(250));
                let text = overlay.text();
                if text != last {
                    println!("{text}");
                    last = text;
                }
            }
        })
        .expect("failed to spawn overlay-printer thread");

    // 6. Capture loop — stdin stands in for the capture pipeline, which
    //    supplies (buffer, valid length) pairs at its own cadence.
    let mut stdin = std::io::stdin().lock();
    let mut buffer = [0u8; FRAME_BYTES];
    loop {
        match stdin.read(&mut buffer) {
            Ok(0) => break, // EOF
            Ok(n) => session.send_audio(AudioFrame::new(&buffer, n)),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("stdin read failed: {e}");
                break;
            }
        }
    }

    // 7. Teardown
    log::info!("input finished; stopping session");
    rt.block_on(session.stop());
    Ok(())
}
