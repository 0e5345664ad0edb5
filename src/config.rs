//! Client configuration
//!
//! Stored as JSON (`tiddlyace/config.json` in the platform config dir by
//! default). Every field has a default, so a missing file or a partial one is
//! fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

const APP_DIR: &str = "tiddlyace";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the TiddlyWeb server
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Use this recipe instead of asking the server's `/status` for a space
    #[serde(default)]
    pub recipe: Option<String>,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// How long status messages stay visible
    #[serde(default = "default_notice_timeout_ms")]
    pub notice_timeout_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// TiddlyWiki compatibility: tag new tiddlers instead of setting their type
    #[serde(default)]
    pub tiddlywiki_mode: bool,
    /// Where unsaved edits are kept between runs. None = platform data dir.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_refresh_interval_ms() -> u64 {
    30_000
}

fn default_notice_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            recipe: None,
            refresh_interval_ms: default_refresh_interval_ms(),
            notice_timeout_ms: default_notice_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            tiddlywiki_mode: false,
            cache_path: None,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json"))
    }

    /// Load from disk, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let write_err = |source: std::io::Error| Error::ConfigWrite {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(write_err)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn notice_timeout(&self) -> Duration {
        Duration::from_millis(self.notice_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Pending cache location, defaulting to the platform data dir
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        self.cache_path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR).join("pending.json")))
    }
}
