//! Ingestion configuration.
//!
//! Plain serde-derived settings, loadable from a TOML file, with sensible
//! defaults for every knob. The CLI overlays its own flags on top of this.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::fetch::{Backoff, DEFAULT_MAX_ATTEMPTS, FetchOptions};
use crate::normalize::DEFAULT_MAX_PIXEL_AREA;
use crate::pipeline::{CoordinatorConfig, DEFAULT_CONCURRENCY};

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file was not valid TOML for this schema.
    #[error("failed to parse config {path}: {detail}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// The TOML error message.
        detail: String,
    },
}

/// Top-level ingestion settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// SQLite database file path.
    pub database_path: PathBuf,
    /// Worker pool size (1-100).
    pub concurrency: usize,
    /// Total per-request fetch timeout, in seconds.
    pub fetch_timeout_secs: u64,
    /// Maximum redirects to follow per fetch.
    pub max_redirects: usize,
    /// Fetch attempts per URI, including the initial one.
    pub max_fetch_attempts: u32,
    /// Backoff strategy between fetch retries.
    pub backoff: Backoff,
    /// Maximum image pixel area (width * height).
    pub max_pixel_area: u64,
    /// Optional per-document deadline, in seconds.
    pub deadline_secs: Option<u64>,
    /// User agent header value.
    pub user_agent: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let fetch = FetchOptions::default();
        Self {
            database_path: PathBuf::from("raito.db"),
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout_secs: fetch.timeout.as_secs(),
            max_redirects: fetch.max_redirects,
            max_fetch_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Exponential,
            max_pixel_area: DEFAULT_MAX_PIXEL_AREA,
            deadline_secs: None,
            user_agent: None,
        }
    }
}

impl IngestConfig {
    /// Loads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] for invalid TOML or unknown keys.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Builds the coordinator configuration from these settings.
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let mut fetch = FetchOptions {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_redirects: self.max_redirects,
            max_attempts: self.max_fetch_attempts,
            backoff: self.backoff,
            ..FetchOptions::default()
        };
        if let Some(user_agent) = &self.user_agent {
            fetch.user_agent = user_agent.clone();
        }

        CoordinatorConfig {
            concurrency: self.concurrency,
            fetch,
            max_pixel_area: self.max_pixel_area,
            deadline: self.deadline_secs.map(Duration::from_secs),
        }
    }
}
