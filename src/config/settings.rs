//! Translation feature settings, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Settings for the external translation-engine process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interpreter used to run the engine script (e.g. `"python"`).
    pub interpreter: String,
    /// Path to the engine script asset — `None` means the installed
    /// location under the config dir ([`AppPaths::engine_script`]).
    pub script_path: Option<PathBuf>,
    /// Name of the environment variable the credential is injected through.
    ///
    /// The credential is never passed on the command line, so it cannot
    /// leak via process listings.
    pub credential_env: String,
    /// Milliseconds to wait for a graceful exit before force-killing.
    pub shutdown_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interpreter: "python".into(),
            script_path: None,
            credential_env: "ZHIPU_API_KEY".into(),
            shutdown_grace_ms: 2_000,
        }
    }
}

impl EngineConfig {
    /// The effective script path — explicit override or the installed asset.
    pub fn resolved_script_path(&self) -> PathBuf {
        self.script_path
            .clone()
            .unwrap_or_else(|| AppPaths::new().engine_script)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// StreamConfig
// ---------------------------------------------------------------------------

/// Settings for the audio stream and the readiness poll that gates it.
///
/// After the engine process launches, its listening endpoint takes a moment
/// to come up. Rather than sleeping a fixed interval, `start` polls the
/// endpoint with exponential backoff until `ready_deadline_ms` expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Engine stream endpoint (audio + config handshake).
    pub endpoint: String,
    /// Engine broadcast endpoint the translation feed subscribes to.
    pub feed_endpoint: String,
    /// First readiness-poll backoff step, in milliseconds.
    pub ready_poll_base_ms: u64,
    /// Backoff ceiling — steps double up to this value.
    pub ready_poll_ceiling_ms: u64,
    /// Total readiness budget; `start` fails once this is exhausted.
    pub ready_deadline_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8765".into(),
            feed_endpoint: "ws://127.0.0.1:8765".into(),
            ready_poll_base_ms: 100,
            ready_poll_ceiling_ms: 1_000,
            ready_deadline_ms: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn ready_poll_base(&self) -> Duration {
        Duration::from_millis(self.ready_poll_base_ms)
    }

    pub fn ready_poll_ceiling(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ceiling_ms)
    }

    pub fn ready_deadline(&self) -> Duration {
        Duration::from_millis(self.ready_deadline_ms)
    }
}

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Bounded reconnect schedule applied after a transmission failure.
///
/// One entry per attempt: the session sleeps `delays_ms[i]` before attempt
/// `i`. When the schedule is exhausted the session stays disconnected and
/// drops frames until the caller starts it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Inter-attempt delays, in milliseconds.
    pub delays_ms: Vec<u64>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delays_ms: vec![1_000, 2_000, 3_000],
        }
    }
}

impl ReconnectConfig {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays_ms
            .iter()
            .map(|&ms| Duration::from_millis(ms))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TranslationConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level translation settings, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use live_translate::config::TranslationConfig;
///
/// // Load (returns Default when file is missing)
/// let config = TranslationConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Whether the translation feature is active.
    pub enabled: bool,
    /// Credential handed to the engine at launch and sent in the config
    /// handshake. Empty means not configured.
    pub api_key: String,
    /// Engine process settings.
    pub engine: EngineConfig,
    /// Stream endpoint / readiness settings.
    pub stream: StreamConfig,
    /// Reconnect schedule.
    pub reconnect: ReconnectConfig,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            engine: EngineConfig::default(),
            stream: StreamConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl TranslationConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(TranslationConfig::default())` when the file does not
    /// exist yet (first-run scenario) so callers never need to special-case
    /// a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
