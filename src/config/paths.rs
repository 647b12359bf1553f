//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings + engine script asset):
//!   Windows: %APPDATA%\live-translate\
//!   macOS:   ~/Library/Application Support/live-translate/
//!   Linux:   ~/.config/live-translate/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml` and the engine script.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Full path to the engine script asset (`engine.py`).
    ///
    /// The installer materialises the script here once per installation;
    /// the supervisor only checks that it exists before launching.
    pub engine_script: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "live-translate";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path (should be extremely rare in practice).
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let settings_file = config_dir.join("settings.toml");
        let engine_script = config_dir.join("engine.py");

        Self {
            config_dir,
            settings_file,
            engine_script,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
        assert!(paths
            .engine_script
            .file_name()
            .is_some_and(|n| n == "engine.py"));
    }
}
