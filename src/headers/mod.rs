//! Header construction for probe attempts.
//!
//! Every attempt gets a freshly built [`HeaderSet`]. The layering order is
//! fixed: identity headers (user agent, referer), then custom headers, then
//! auth headers, then the variant's mutation header. Later layers replace
//! earlier values of the same (case-insensitive) name.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::ConfigError;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:95.0) Gecko/20100101 Firefox/95.0";

pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
    DEFAULT_USER_AGENT,
];

const REFERERS: &[&str] = &[
    "https://www.google.com/",
    "https://www.bing.com/",
    "https://duckduckgo.com/",
    "https://search.yahoo.com/",
    "https://www.linkedin.com/",
];

/// Ordered, case-insensitive header list for one attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A replaced header keeps its original position.
    pub fn set(&mut self, name: &str, value: &str) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub token: Option<String>,
    pub token_type: String,
    pub api_key: Option<String>,
}

impl AuthContext {
    pub fn new(token: Option<String>, token_type: Option<String>, api_key: Option<String>) -> Self {
        let token_type = token_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string());
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
            token_type,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Reject values that cannot be sent as header values, e.g. a token
    /// carrying a control character.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |name: &str, value: &str| {
            reqwest::header::HeaderValue::from_str(value)
                .map(|_| ())
                .map_err(|_| ConfigError::InvalidHeader {
                    header: format!("{name}: {}", value.escape_debug()),
                })
        };
        if let Some(token) = self.token.as_deref() {
            check("Authorization", &format!("{} {}", self.token_type, token))?;
        }
        if let Some(key) = self.api_key.as_deref() {
            check("X-API-Key", key)?;
        }
        Ok(())
    }

    fn apply(&self, headers: &mut HeaderSet) {
        if let Some(token) = self.token.as_deref() {
            headers.set("Authorization", &format!("{} {}", self.token_type, token));
        }
        if let Some(key) = self.api_key.as_deref() {
            headers.set("X-API-Key", key);
        }
    }
}

/// A single bypass-oriented header tried as its own attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationHeader {
    pub name: String,
    pub value: String,
}

/// Parse a `Key: Value` custom header.
pub fn parse_header_line(raw: &str) -> Result<(String, String), ConfigError> {
    let invalid = || ConfigError::InvalidHeader {
        header: raw.to_string(),
    };
    let (name, value) = raw.split_once(':').ok_or_else(invalid)?;
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() {
        return Err(invalid());
    }
    reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    reqwest::header::HeaderValue::from_str(value).map_err(|_| invalid())?;
    Ok((name.to_string(), value.to_string()))
}

/// The bypass variants tried for a candidate when mutation is enabled.
pub fn mutation_headers(candidate: &str) -> Vec<MutationHeader> {
    let path = format!("/{}", candidate.trim_start_matches('/'));
    let loopback = [
        "X-Forwarded-For",
        "X-Real-IP",
        "X-Originating-IP",
        "X-Remote-IP",
        "X-Client-IP",
        "X-Custom-IP-Authorization",
    ];
    let host_override = ["X-Forwarded-Host", "X-Host"];
    let url_override = ["X-Original-URL", "X-Rewrite-URL"];

    let mut out = Vec::new();
    for name in loopback {
        out.push(MutationHeader {
            name: name.to_string(),
            value: "127.0.0.1".to_string(),
        });
    }
    for name in host_override {
        out.push(MutationHeader {
            name: name.to_string(),
            value: "localhost".to_string(),
        });
    }
    for name in url_override {
        out.push(MutationHeader {
            name: name.to_string(),
            value: path.clone(),
        });
    }
    out
}

#[derive(Clone, Debug)]
pub struct HeaderMutator {
    auth: AuthContext,
    custom: Vec<(String, String)>,
    mutate: bool,
    random_agent: bool,
    user_agent: String,
}

impl HeaderMutator {
    pub fn new(
        auth: AuthContext,
        custom: Vec<(String, String)>,
        mutate: bool,
        random_agent: bool,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            auth,
            custom,
            mutate,
            random_agent,
            user_agent: user_agent
                .filter(|ua| !ua.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        }
    }

    /// Build a mutator from raw `Key: Value` lines.
    pub fn from_header_lines(
        auth: AuthContext,
        lines: &[String],
        mutate: bool,
        random_agent: bool,
        user_agent: Option<String>,
    ) -> Result<Self, ConfigError> {
        let custom = lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| parse_header_line(l))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(auth, custom, mutate, random_agent, user_agent))
    }

    pub fn mutation_enabled(&self) -> bool {
        self.mutate
    }

    /// Variants for `candidate`; empty when mutation is disabled.
    pub fn variants(&self, candidate: &str) -> Vec<MutationHeader> {
        if !self.mutate {
            return Vec::new();
        }
        mutation_headers(candidate)
    }

    /// Headers for the un-mutated baseline attempt.
    pub fn baseline<R: Rng + ?Sized>(&self, rng: &mut R) -> HeaderSet {
        let mut headers = HeaderSet::new();
        if self.random_agent {
            let ua = USER_AGENTS.choose(rng).copied().unwrap_or(DEFAULT_USER_AGENT);
            headers.set("User-Agent", ua);
            if let Some(referer) = REFERERS.choose(rng) {
                headers.set("Referer", referer);
            }
        } else {
            headers.set("User-Agent", &self.user_agent);
        }
        for (name, value) in self.custom.iter() {
            headers.set(name, value);
        }
        self.auth.apply(&mut headers);
        headers
    }

    /// Headers for one variant attempt: the baseline plus the mutation header.
    pub fn variant<R: Rng + ?Sized>(&self, mutation: &MutationHeader, rng: &mut R) -> HeaderSet {
        let mut headers = self.baseline(rng);
        headers.set(&mutation.name, &mutation.value);
        headers
    }
}
