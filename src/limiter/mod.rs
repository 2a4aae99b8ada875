use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigError;

pub const DEFAULT_RATE: f64 = 5.0;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("scan cancelled")]
pub struct Cancelled;

/// Global request pacer shared by every worker.
///
/// Grants are spaced uniformly: each permission is handed out no earlier than
/// `1/rate` seconds after the previous one, no matter how many callers are
/// waiting. There is no burst allowance.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    // next instant a grant may be issued at; None until the first grant
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(rate: f64) -> Result<Self, ConfigError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::InvalidRate { value: rate });
        }
        Ok(Self {
            interval: Duration::from_secs_f64(1.0 / rate),
            next_slot: Mutex::new(None),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next send slot.
    ///
    /// The slot is reserved under the lock and slept for outside of it, so
    /// concurrent callers queue up on consecutive slots. Returns `Cancelled`
    /// as soon as `cancel` fires, including while sleeping.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let now = Instant::now();
        let slot = self.reserve(now);
        if slot <= now {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            _ = time::sleep_until(slot) => Ok(()),
        }
    }

    fn reserve(&self, now: Instant) -> Instant {
        let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.interval);
        slot
    }
}
