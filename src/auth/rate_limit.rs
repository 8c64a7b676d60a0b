//! Per-client token-bucket admission control.
//!
//! Flow Overview:
//! 1) Look up (or lazily create, full) the bucket for the client address.
//! 2) Refill by elapsed time since `last_seen`, capped at `burst`.
//! 3) Spend one token to admit; otherwise report how long until one accrues.
//!
//! Lookup, refill, and spend happen under one lock acquisition so two
//! requests from the same client never interleave their read-modify-write.
//! A sweeper task drops buckets idle longer than [`RETENTION`] under the
//! same lock. State is process-local and lost on restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often idle buckets are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Buckets not seen for this long are dropped by the sweeper.
pub const RETENTION: Duration = Duration::from_secs(3 * 60);

const DEFAULT_RATE: f64 = 2.0;
const DEFAULT_BURST: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitConfig {
    rate: f64,
    burst: u32,
    enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    /// Default config: 2 requests/second with bursts of 4, enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            enabled: true,
        }
    }

    #[must_use]
    pub const fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    #[must_use]
    pub const fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }

    #[must_use]
    pub const fn burst(&self) -> u32 {
        self.burst
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Clamp values that would make the bucket unusable.
    #[must_use]
    pub fn normalize(self) -> Self {
        let rate = if self.rate.is_finite() && self.rate > 0.0 {
            self.rate
        } else {
            DEFAULT_RATE
        };
        Self {
            rate,
            burst: self.burst.max(1),
            enabled: self.enabled,
        }
    }
}

/// Outcome of an admission check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Admission {
    Allowed,
    Limited { retry_after: Duration },
}

impl Admission {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Clone, Copy, Debug)]
struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    // `None` when disabled: no state is kept at all.
    clients: Option<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let config = config.normalize();
        let clients = config.enabled.then(|| Mutex::new(HashMap::new()));
        Self { config, clients }
    }

    /// Decide whether a request from `client` is admitted.
    pub async fn check(&self, client: &str) -> Admission {
        let Some(clients) = &self.clients else {
            return Admission::Allowed;
        };
        let now = Instant::now();
        let burst = f64::from(self.config.burst);
        let rate = self.config.rate;

        let mut clients = clients.lock().await;
        let bucket = clients.entry(client.to_string()).or_insert(Bucket {
            tokens: burst,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_seen);
        bucket.tokens = elapsed
            .as_secs_f64()
            .mul_add(rate, bucket.tokens)
            .min(burst);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Admission::Allowed
        } else {
            let missing = 1.0 - bucket.tokens;
            Admission::Limited {
                retry_after: Duration::try_from_secs_f64(missing / rate).unwrap_or(Duration::MAX),
            }
        }
    }

    /// Drop buckets idle longer than [`RETENTION`]; returns how many went.
    pub async fn sweep(&self) -> usize {
        let Some(clients) = &self.clients else {
            return 0;
        };
        let now = Instant::now();
        let mut clients = clients.lock().await;
        let before = clients.len();
        clients.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= RETENTION);
        before - clients.len()
    }

    /// Number of tracked clients.
    pub async fn len(&self) -> usize {
        match &self.clients {
            Some(clients) => clients.lock().await.len(),
            None => 0,
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `client` currently has a bucket.
    pub async fn tracks(&self, client: &str) -> bool {
        match &self.clients {
            Some(clients) => clients.lock().await.contains_key(client),
            None => false,
        }
    }

    /// Run the sweeper every [`SWEEP_INTERVAL`] until `shutdown` fires.
    ///
    /// Returns `None` when limiting is disabled.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        self.clients.as_ref()?;
        let limiter = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("rate limiter sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep().await;
                        debug!(removed, "rate limiter sweep");
                    }
                }
            }
        }))
    }
}
