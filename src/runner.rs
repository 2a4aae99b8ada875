use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

use crate::aggregator::{Aggregator, Finding, Resolved, ScanSession, Summary};
use crate::config::ConfigError;
use crate::context::RunContext;
use crate::dispatch::{self, Pool, Target};
use crate::executor::transport::ClientBuildError;
use crate::executor::{Executor, HttpTransport, RetryPolicy, Transport};
use crate::headers::{AuthContext, HeaderMutator};
use crate::limiter::{self, RateLimiter};
use crate::utils;

pub const DEFAULT_WORDLIST: &str = "apiroutes.txt";
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

#[derive(Clone, Debug)]
pub enum WordlistSource {
    FilePath(String),
    Inline(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct Options {
    pub url: String,
    pub wordlist: WordlistSource,
    pub method: String,
    pub timeout_seconds: u64,
    pub concurrency: usize,
    pub rate: f64,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub rate_limit_cooldown: Duration,
    pub token: Option<String>,
    pub token_type: Option<String>,
    pub api_key: Option<String>,
    pub headers: Vec<String>,
    pub mutate_headers: bool,
    pub random_agent: bool,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            url: String::new(),
            wordlist: WordlistSource::FilePath(DEFAULT_WORDLIST.to_string()),
            method: "GET".to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            concurrency: dispatch::DEFAULT_CONCURRENCY,
            rate: limiter::DEFAULT_RATE,
            max_attempts: policy.max_attempts,
            backoff: policy.backoff,
            rate_limit_cooldown: policy.rate_limit_cooldown,
            token: None,
            token_type: None,
            api_key: None,
            headers: Vec::new(),
            mutate_headers: false,
            random_agent: false,
            user_agent: None,
            proxy: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientBuildError),

    #[error("failed to open file for {kind}: {path}: {source}")]
    FileOpen {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read lines for {kind}: {path}: {source}")]
    FileRead {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wordlist is empty")]
    EmptyWordlist,
}

#[derive(Clone, Debug)]
pub struct ScanResult {
    pub context: RunContext,
    pub elapsed: Duration,
    pub cancelled: bool,
    pub total_candidates: usize,
    pub summary: Summary,
    pub findings: Vec<Finding>,
    pub outcomes: Vec<Resolved>,
}

/// Validated scan setup. Every configuration error surfaces from
/// [`Runner::new`], before a single candidate is dispatched.
pub struct Runner {
    options: Options,
    context: RunContext,
    target: Target,
    mutator: HeaderMutator,
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(options: Options) -> Result<Self, RunnerError> {
        Self::with_context(options, RunContext::new())
    }

    pub fn with_context(options: Options, context: RunContext) -> Result<Self, RunnerError> {
        if options.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency {
                value: options.concurrency,
            }
            .into());
        }
        if options.timeout_seconds == 0 {
            return Err(ConfigError::InvalidTimeout {
                value: options.timeout_seconds,
            }
            .into());
        }
        if options.max_attempts == 0 || options.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ConfigError::InvalidRetries {
                value: options.max_attempts,
            }
            .into());
        }

        let method = dispatch::parse_method(&options.method)?;
        let timeout = Duration::from_secs(options.timeout_seconds);
        let target = Target::new(&options.url, method, timeout)?;
        let limiter = Arc::new(RateLimiter::new(options.rate)?);

        let auth = AuthContext::new(
            options.token.clone(),
            options.token_type.clone(),
            options.api_key.clone(),
        );
        auth.validate()?;
        let mutator = HeaderMutator::from_header_lines(
            auth,
            &options.headers,
            options.mutate_headers,
            options.random_agent,
            options.user_agent.clone(),
        )?;

        let policy = RetryPolicy {
            max_attempts: options.max_attempts,
            backoff: options.backoff,
            rate_limit_cooldown: options.rate_limit_cooldown,
            ..RetryPolicy::default()
        };

        let transport = HttpTransport::new(timeout, options.proxy.as_deref())?;

        Ok(Self {
            options,
            context,
            target,
            mutator,
            policy,
            limiter,
            transport: Arc::new(transport),
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the network transport, e.g. to route through a custom client.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Token that stops the scan: no new candidates, no new retries.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn load_candidates(&self) -> Result<Vec<String>, RunnerError> {
        let words = utils::load_wordlist(&self.options.wordlist).await?;
        if words.is_empty() {
            return Err(RunnerError::EmptyWordlist);
        }
        Ok(words)
    }

    pub async fn run(&self) -> Result<ScanResult, RunnerError> {
        let candidates = self.load_candidates().await?;
        self.run_candidates(candidates, |_| {}).await
    }

    /// Probe `candidates`, calling `on_resolved` once per resolved candidate
    /// as results arrive. Nothing is recorded once the cancel token fires, so
    /// cancelling from `on_resolved` after K calls leaves exactly K outcomes.
    pub async fn run_candidates<F>(
        &self,
        candidates: Vec<String>,
        on_resolved: F,
    ) -> Result<ScanResult, RunnerError>
    where
        F: FnMut(&Resolved),
    {
        let span = self.context.span();
        self.scan(candidates, on_resolved).instrument(span).await
    }

    async fn scan<F>(&self, candidates: Vec<String>, on_resolved: F) -> Result<ScanResult, RunnerError>
    where
        F: FnMut(&Resolved),
    {
        let started_at = Instant::now();
        let total_candidates = candidates.len();
        info!(
            target = %self.target.base(),
            method = %self.target.method(),
            timeout_secs = self.target.timeout().as_secs(),
            concurrency = self.options.concurrency,
            rate = self.options.rate,
            mutate_headers = self.mutator.mutation_enabled(),
            total = total_candidates,
            "starting scan"
        );

        let executor = Executor::new(
            self.transport.clone(),
            self.limiter.clone(),
            self.policy,
            self.cancel.clone(),
        );
        let pool = Pool::new(
            self.target.clone(),
            self.mutator.clone(),
            executor,
            self.cancel.clone(),
        );
        let reports = pool.run(candidates, self.options.concurrency)?;
        let session = Aggregator::new(ScanSession::new(self.context.clone()))
            .with_cancel(self.cancel.clone())
            .consume(reports, on_resolved)
            .await;

        let summary = session.summary();
        let cancelled = self.cancel.is_cancelled();
        info!(
            checked = summary.checked,
            working = summary.working,
            bypass = summary.bypass,
            failed = summary.failed,
            cancelled,
            "scan finished"
        );

        Ok(ScanResult {
            context: self.context.clone(),
            elapsed: started_at.elapsed(),
            cancelled,
            total_candidates,
            summary,
            findings: session.findings(),
            outcomes: session.outcomes(),
        })
    }
}
