//! Retry logic with exponential backoff and jitter.

use std::time::Duration;

use super::client::{HttpMethod, HttpResponse};

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed { delay: Duration },
    /// Delay is `base * (factor ^ attempt)`, capped at `max`, optionally with
    /// +/- 50% jitter.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let mut delay = Duration::from_secs_f64(seconds.min(max.as_secs_f64()));

                if jitter {
                    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    let spread = millis / 2;
                    let offset = fastrand::u64(0..=spread.saturating_mul(2));
                    delay = Duration::from_millis((millis + offset).saturating_sub(spread));
                }

                delay
            }
        }
    }

    /// Upper bound on any single wait.
    pub const fn max_delay(self) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential { max, .. } => max,
        }
    }
}

/// Configuration for the automatic retry mechanism.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retry_on_status: Vec<u16>,
    /// Retry timeouts and connection failures reported by the transport.
    pub retry_on_transport: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            backoff: Backoff::default(),
            retry_on_status: vec![429, 500, 502, 503, 504],
            retry_on_transport: true,
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` retries so far.
    pub fn allows_retry(&self, method: HttpMethod, attempt: u32) -> bool {
        self.enabled && method.is_idempotent() && attempt < self.max_retries
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Delay before retrying `response`: a `Retry-After` seconds value on a
    /// 429 wins, capped at the backoff maximum.
    pub fn delay_for_response(&self, attempt: u32, response: &HttpResponse) -> Duration {
        if response.status == 429 {
            if let Some(seconds) = response
                .header("retry-after")
                .and_then(|value| value.trim().parse::<u64>().ok())
            {
                return Duration::from_secs(seconds).min(self.backoff.max_delay());
            }
        }
        self.delay_for_attempt(attempt)
    }
}
