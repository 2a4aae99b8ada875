use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Invalid run configuration. Always raised before any candidate is
/// dispatched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid rate limit {value}, expected a positive number of requests per second")]
    InvalidRate { value: f64 },

    #[error("invalid concurrency {value}, expected at least 1 worker")]
    InvalidConcurrency { value: usize },

    #[error("unsupported HTTP method '{method}' (allowed: GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS)")]
    InvalidMethod { method: String },

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid timeout {value}s, expected a positive number of seconds")]
    InvalidTimeout { value: u64 },

    #[error("invalid retry count {value}, expected between 1 and 10 attempts")]
    InvalidRetries { value: u32 },

    #[error("invalid header '{header}', expected 'Key: Value'")]
    InvalidHeader { header: String },

    #[error("invalid output format '{format}', expected text or json")]
    InvalidOutputFormat { format: String },
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub wordlist: Option<String>,
    pub timeout: Option<u64>,
    pub method: Option<String>,
    pub threads: Option<usize>,
    #[serde(alias = "rate")]
    pub rate_limit: Option<f64>,
    pub retries: Option<u32>,
    pub token: Option<String>,
    pub token_type: Option<String>,
    pub api_key: Option<String>,
    #[serde(alias = "header")]
    pub headers: Option<Vec<String>>,
    pub mutate_headers: Option<bool>,
    pub random_agent: Option<bool>,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub output: Option<String>,
    pub output_format: Option<String>,
    pub no_progress: Option<bool>,
    pub no_color: Option<bool>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".routehound").join("config.yml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn parse_config(contents: &str, origin: &Path) -> Result<ConfigFile, String> {
    // an empty or comment-only file deserializes to unit, not a mapping
    if contents
        .lines()
        .all(|l| l.trim().is_empty() || l.trim_start().starts_with('#'))
    {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str::<ConfigFile>(contents)
        .map_err(|e| format!("failed to parse config '{}': {e}", origin.display()))
}

pub fn load_config(path: &Path, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}
