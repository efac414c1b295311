use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::ProviderType;

/// Published request budget of an upstream platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub provider_type: ProviderType,
    pub quota_window: Duration,
    pub quota_limit: u32,
}

impl ProviderPolicy {
    pub const fn new(provider_type: ProviderType, quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            provider_type,
            quota_window,
            quota_limit,
        }
    }

    pub const fn default_for(provider_type: ProviderType) -> Self {
        let minute = Duration::from_secs(60);
        match provider_type {
            ProviderType::ConnectwiseManage => Self::new(provider_type, minute, 600),
            // Autotask budgets per hour across the whole tenant.
            ProviderType::Autotask => Self::new(provider_type, Duration::from_secs(3_600), 10_000),
            ProviderType::Halopsa => Self::new(provider_type, minute, 700),
            ProviderType::Syncro => Self::new(provider_type, minute, 180),
            ProviderType::Freshservice => Self::new(provider_type, minute, 100),
            ProviderType::Ninjaone => Self::new(provider_type, minute, 600),
            ProviderType::DattoRmm => Self::new(provider_type, minute, 600),
            ProviderType::Atera => Self::new(provider_type, minute, 700),
            ProviderType::TacticalRmm => Self::new(provider_type, minute, 600),
        }
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Request budget shared by every call of one adapter. Callers wait for
/// budget instead of failing.
#[derive(Clone)]
pub struct RequestThrottle {
    limiter: Arc<DirectRateLimiter>,
}

impl std::fmt::Debug for RequestThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestThrottle")
    }
}

impl RequestThrottle {
    pub fn new(quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(quota_window, quota_limit))),
        }
    }

    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self::new(policy.quota_window, policy.quota_limit)
    }

    /// Non-blocking check; consumes budget when available.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
