//! Runtime configuration read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::error::{AppError, AppResult};

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_STATE_FILE: &str = ".appseba/session.json";

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the REST API; request paths are appended to its path.
    pub api_url: Url,
    /// JSON file holding the persisted session keys.
    pub state_file: PathBuf,
    pub http_timeout: Duration,
    /// How often file-backed storage is checked for writes made by other processes.
    pub storage_poll: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default api url is valid"),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            http_timeout: Duration::from_secs(30),
            storage_poll: Duration::from_millis(1000),
        }
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> AppResult<Self> {
        let api = lookup("SEBA_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let state_file = lookup("SEBA_STATE_FILE").unwrap_or_else(|| DEFAULT_STATE_FILE.to_string());
        let timeout_secs = parse_positive(&lookup, "SEBA_HTTP_TIMEOUT_SECS", 30)?;
        let poll_ms = parse_positive(&lookup, "SEBA_STORAGE_POLL_MS", 1000)?;
        Ok(Self {
            api_url: parse_api_url(&api)?,
            state_file: PathBuf::from(state_file),
            http_timeout: Duration::from_secs(timeout_secs),
            storage_poll: Duration::from_millis(poll_ms),
        })
    }

    pub fn with_api_url(mut self, url: &str) -> AppResult<Self> {
        self.api_url = parse_api_url(url)?;
        Ok(self)
    }
}

pub fn parse_api_url(raw: &str) -> AppResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| AppError::config("invalid_api_url".to_string(), format!("{}: {}", raw, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AppError::config("invalid_api_url".to_string(), format!("unsupported scheme '{}'", url.scheme())));
    }
    Ok(url)
}

fn parse_positive<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u64) -> AppResult<u64> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(AppError::config("invalid_number".to_string(), format!("{} must be a positive integer, got '{}'", key, raw))),
        },
    }
}
