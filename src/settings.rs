//! Persisted settings - simple key-value state kept between sessions
//!
//! Default timeout, favorite command names, and the last save directory,
//! stored as JSON under the platform config directory. Missing or unreadable
//! settings fall back to defaults; nothing here is load-bearing.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

fn default_timeout_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Timeout applied when a run does not specify one.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Names of favorited catalogue entries.
    #[serde(default)]
    pub favorites: BTreeSet<String>,

    /// Directory of the most recent `--output` save.
    #[serde(default)]
    pub last_save_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            favorites: BTreeSet::new(),
            last_save_dir: None,
        }
    }
}

impl Settings {
    /// The settings file location under the platform config directory, or
    /// `None` when no home directory is available.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "syscheck")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Load settings from a file, returning defaults when the file does not
    /// exist yet.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read settings {path:?}"))
            }
        };

        serde_json::from_str(&content).with_context(|| format!("Invalid settings file {path:?}"))
    }

    /// Persist settings, creating the parent directory on first save.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create settings directory {parent:?}"))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write settings {path:?}"))?;

        debug!("Settings saved to {:?}", path);
        Ok(())
    }
}
