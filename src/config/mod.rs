//! Configuration module for the live-translation client.
//!
//! Provides `TranslationConfig` (top-level settings), sub-configs for the
//! engine process / stream / reconnect policy, `AppPaths` for cross-platform
//! data directories, and TOML persistence via `TranslationConfig::load` /
//! `TranslationConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{EngineConfig, ReconnectConfig, StreamConfig, TranslationConfig};
