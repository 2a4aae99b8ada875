pub mod response;
pub mod transport;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::limiter::RateLimiter;

pub use response::ParsedBody;
pub use transport::{HttpTransport, ProbeRequest, RawResponse, Transport, TransportError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    UnsafeEntry,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotFound => f.write_str("not found"),
            SkipReason::UnsafeEntry => f.write_str("unsafe entry"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FailureKind {
    #[error("timed out")]
    Timeout,

    #[error("connection error")]
    ConnectionError,

    #[error("rate limited")]
    RateLimited,

    #[error("request error: {0}")]
    Request(String),
}

/// Terminal outcome of one probe (a baseline or a single header variant),
/// after retries are exhausted or a definitive response arrived.
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptResult {
    Working { status: u16, body: ParsedBody },
    Skipped(SkipReason),
    Failed(FailureKind),
}

impl AttemptResult {
    pub fn is_working(&self) -> bool {
        matches!(self, AttemptResult::Working { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptResult::Working { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts per probe, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry of a timeout or connection error;
    /// doubles with every further retry.
    pub backoff: Duration,
    /// Wait after a 429 that carries no usable `Retry-After`.
    pub rate_limit_cooldown: Duration,
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(500),
            rate_limit_cooldown: Duration::from_secs(2),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp)
    }

    fn rate_limit_delay(&self, retry_after: Option<&str>) -> Duration {
        retry_after
            .and_then(response::parse_retry_after_secs)
            .map(|secs| Duration::from_secs(secs).min(self.max_retry_after))
            .unwrap_or(self.rate_limit_cooldown)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryReason {
    Timeout,
    Connection,
    RateLimited,
}

/// Per-probe retry state.
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptState {
    Pending,
    Retrying {
        retry: u32,
        reason: RetryReason,
        delay: Duration,
    },
    Definitive(AttemptResult),
}

/// Advance the retry state machine after attempt number `attempt` (1-based)
/// produced `outcome`.
pub fn next_state(
    policy: &RetryPolicy,
    attempt: u32,
    outcome: Result<RawResponse, TransportError>,
) -> AttemptState {
    let can_retry = attempt < policy.max_attempts;
    match outcome {
        Ok(resp) if resp.status == 404 => AttemptState::Definitive(AttemptResult::Skipped(
            SkipReason::NotFound,
        )),
        Ok(resp) if resp.status == 429 => {
            if can_retry {
                AttemptState::Retrying {
                    retry: attempt,
                    reason: RetryReason::RateLimited,
                    delay: policy.rate_limit_delay(resp.retry_after.as_deref()),
                }
            } else {
                AttemptState::Definitive(AttemptResult::Failed(FailureKind::RateLimited))
            }
        }
        Ok(resp) => AttemptState::Definitive(AttemptResult::Working {
            status: resp.status,
            body: ParsedBody::parse(resp.body),
        }),
        Err(TransportError::Timeout) => {
            if can_retry {
                AttemptState::Retrying {
                    retry: attempt,
                    reason: RetryReason::Timeout,
                    delay: policy.backoff_for(attempt),
                }
            } else {
                AttemptState::Definitive(AttemptResult::Failed(FailureKind::Timeout))
            }
        }
        Err(TransportError::Connection(_)) => {
            if can_retry {
                AttemptState::Retrying {
                    retry: attempt,
                    reason: RetryReason::Connection,
                    delay: policy.backoff_for(attempt),
                }
            } else {
                AttemptState::Definitive(AttemptResult::Failed(FailureKind::ConnectionError))
            }
        }
        Err(TransportError::Request(msg)) => {
            AttemptState::Definitive(AttemptResult::Failed(FailureKind::Request(msg)))
        }
    }
}

/// Sends probes through the shared limiter and applies the retry policy.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy,
            cancel,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one probe to a terminal result.
    ///
    /// Returns `None` when cancellation interrupted the probe before it
    /// resolved: while waiting for a send slot or between retries. An
    /// attempt already on the wire is always allowed to finish.
    pub async fn execute(&self, request: &ProbeRequest) -> Option<AttemptResult> {
        let mut state = AttemptState::Pending;
        let mut attempt = 0u32;
        loop {
            match state {
                AttemptState::Definitive(result) => return Some(result),
                AttemptState::Retrying {
                    retry,
                    reason,
                    delay,
                } => {
                    if reason == RetryReason::RateLimited {
                        warn!(url = %request.url, retry, ?delay, "rate limit detected, backing off");
                    } else {
                        debug!(url = %request.url, retry, ?reason, ?delay, "retrying");
                    }
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return None,
                        _ = time::sleep(delay) => {}
                    }
                }
                AttemptState::Pending => {}
            }

            if self.limiter.acquire(&self.cancel).await.is_err() {
                return None;
            }
            attempt += 1;
            let started = Instant::now();
            let outcome = self.transport.send(request).await;
            trace!(
                url = %request.url,
                attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = outcome.is_ok(),
                "attempt finished"
            );
            state = next_state(&self.policy, attempt, outcome);
        }
    }
}
