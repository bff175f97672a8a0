//! Daemon configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for daemon-private files; the other paths live under it by default.
    pub files_dir: PathBuf,
    /// Bundled helper binaries (statically linked shells, relay client).
    pub support_dir: PathBuf,
    /// Installed userland prefix; supplies PATH and LD_LIBRARY_PATH entries.
    pub prefix_dir: PathBuf,
    /// Home directory for spawned sessions.
    pub home_dir: PathBuf,

    /// Hard cap on concurrently managed sessions.
    pub max_sessions: usize,

    /// Statically linked shells probed under `support_dir`; the first one
    /// that is executable becomes the preferred interpreter.
    pub fallback_shells: Vec<String>,
    /// Relay client binary (under `support_dir`) used for remote sessions.
    pub relay_binary: String,
    pub relay_flags: Vec<String>,
    /// Shell used verbatim in fail-safe mode.
    pub failsafe_shell: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let files_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("muxd");
        Self::with_files_dir(files_dir)
    }
}

impl Config {
    /// Configuration rooted at `files_dir`, everything else defaulted.
    pub fn with_files_dir(files_dir: PathBuf) -> Self {
        Self {
            support_dir: files_dir.join("support"),
            prefix_dir: files_dir.join("usr"),
            home_dir: files_dir.join("home"),
            files_dir,
            max_sessions: 8,
            fallback_shells: vec!["busybox".to_string()],
            relay_binary: "dbclient".to_string(),
            relay_flags: vec!["-y".to_string(), "-y".to_string()],
            failsafe_shell: PathBuf::from("/bin/sh"),
        }
    }

    /// Load from the first config file found, falling back to defaults.
    pub fn load() -> Self {
        let paths = [
            dirs::config_dir().map(|p| p.join("muxd/config.toml")),
            dirs::home_dir().map(|p| p.join(".muxd.toml")),
            Some(PathBuf::from("muxd.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if let Ok(config) = toml::from_str(&content) {
                        return config;
                    }
                }
            }
        }

        Config::default()
    }

    /// Load from an explicit path; unlike [`Config::load`] a broken file is
    /// an error rather than silently falling back.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }
}
