use std::time::Duration;

use reqwest::{Method, Url};

use crate::config::ConfigError;
use crate::executor::ProbeRequest;
use crate::headers::HeaderSet;

pub const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

pub fn parse_method(raw: &str) -> Result<Method, ConfigError> {
    let canonical = raw.trim().to_ascii_uppercase();
    if !ALLOWED_METHODS.contains(&canonical.as_str()) {
        return Err(ConfigError::InvalidMethod {
            method: raw.to_string(),
        });
    }
    Method::from_bytes(canonical.as_bytes()).map_err(|_| ConfigError::InvalidMethod {
        method: raw.to_string(),
    })
}

/// Rejects path-traversal shaped entries before anything touches the network.
pub fn is_safe_candidate(candidate: &str) -> bool {
    !(candidate.contains("..") || candidate.starts_with('/') || candidate.contains('\\'))
}

/// Where and how every candidate is sent. Fixed for the whole run.
#[derive(Clone, Debug)]
pub struct Target {
    base: Url,
    method: Method,
    timeout: Duration,
}

impl Target {
    pub fn new(base: &str, method: Method, timeout: Duration) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: base.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = base.trim();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(invalid("URL must start with http:// or https://"));
        }
        let mut url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        if timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout { value: 0 });
        }
        // candidates resolve beneath the base path, not next to its last segment
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self {
            base: url,
            method,
            timeout,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve a candidate to its request URL. `None` means the entry is
    /// unsafe: it matches the traversal denylist or would resolve outside
    /// the base URL.
    pub fn resolve(&self, candidate: &str) -> Option<Url> {
        if candidate.is_empty() || !is_safe_candidate(candidate) {
            return None;
        }
        let url = self.base.join(candidate).ok()?;
        if url.origin() != self.base.origin() || !url.path().starts_with(self.base.path()) {
            return None;
        }
        Some(url)
    }

    pub fn request(&self, url: Url, headers: HeaderSet) -> ProbeRequest {
        ProbeRequest {
            url,
            method: self.method.clone(),
            headers,
            timeout: self.timeout,
        }
    }
}
