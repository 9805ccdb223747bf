use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::stream::{Pacing, StreamOptions};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 2000;

/// Persisted settings, stored as JSON under the user's config directory.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub backend_url: Option<String>,
    /// Delay between characters when animating replies; 0 or absent disables it.
    pub typewriter_ms: Option<u64>,
    pub max_upload_bytes: Option<u64>,
    pub max_message_chars: Option<usize>,
    pub stream_idle_timeout_secs: Option<u64>,
    /// Last file that uploaded successfully, offered again on the next start.
    pub last_file: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_last_file(config_path: &Path, file: &Path) -> Result<()> {
        let mut config = Self::load_from(config_path).unwrap_or_else(|_| Self::new());
        config.last_file = Some(file.to_path_buf());
        config.save_to(config_path)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("resume-chat").join("config.json"))
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend_url: Option<String>,
    pub typewriter_ms: Option<u64>,
    pub stream_idle_timeout_secs: Option<u64>,
}

/// Effective settings after layering defaults, config file and overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub backend_url: String,
    pub pacing: Pacing,
    pub max_upload_bytes: u64,
    pub max_message_chars: usize,
    pub idle_timeout: Option<Duration>,
    pub last_file: Option<PathBuf>,
    pub config_path: PathBuf,
}

impl Settings {
    pub fn resolve(config: Config, overrides: Overrides, config_path: PathBuf) -> Self {
        let backend_url = overrides
            .backend_url
            .or(config.backend_url)
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let idle_secs = overrides
            .stream_idle_timeout_secs
            .or(config.stream_idle_timeout_secs)
            .filter(|secs| *secs > 0);

        Self {
            backend_url,
            pacing: Pacing::from_millis(overrides.typewriter_ms.or(config.typewriter_ms)),
            max_upload_bytes: config.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            max_message_chars: config
                .max_message_chars
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_MESSAGE_CHARS),
            idle_timeout: idle_secs.map(Duration::from_secs),
            last_file: config.last_file,
            config_path,
        }
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            pacing: self.pacing,
            idle_timeout: self.idle_timeout,
        }
    }
}
