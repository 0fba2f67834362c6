//! In-process rate limiter store.
//!
//! Buckets live in a sharded [`DashMap`]. Each entry carries an idle deadline;
//! stale entries are dropped lazily when next touched and eagerly by a
//! background sweeper task.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::backend::{is_bypass, CallContext, RateLimiterStore, StoreError};
use super::bucket::TokenBucket;
use crate::config::LocalStoreConfig;

/// A bucket together with the moment it is considered idle.
#[derive(Debug)]
struct Slot {
    bucket: TokenBucket,
    /// `None` when entries never expire
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Buckets = DashMap<String, Slot>;

/// A rate limiter store that keeps one token bucket per identifier in memory.
///
/// Precise within a single process only. Idle identifiers are evicted after
/// the configured expiration, which bounds memory to recently active callers.
pub struct LocalStore {
    buckets: Arc<Buckets>,
    /// Idle lifetime of a bucket (`None`: keep forever)
    expiration: Option<Duration>,
    sweeper: Option<JoinHandle<()>>,
}

impl LocalStore {
    /// Create a local store and, if a cleanup interval is configured, spawn
    /// its sweeper on the current tokio runtime.
    pub fn new(config: &LocalStoreConfig) -> Self {
        let buckets = Arc::new(Buckets::new());
        let expiration = Some(config.expiration()).filter(|d| !d.is_zero());
        let interval = config.cleanup_interval();

        let sweeper = if interval.is_zero() || expiration.is_none() {
            None
        } else {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => Some(handle.spawn(sweep(Arc::downgrade(&buckets), interval))),
                Err(_) => {
                    warn!("No tokio runtime; idle buckets will only expire on access");
                    None
                }
            }
        };

        debug!(
            expiration = ?expiration,
            cleanup_interval = ?interval,
            sweeper = sweeper.is_some(),
            "Local rate limiter store created"
        );

        Self {
            buckets,
            expiration,
            sweeper,
        }
    }

    /// Take one token for `identifier`, creating its bucket on first sight.
    fn acquire(&self, identifier: &str, window: Duration, limit: u64) -> bool {
        let now = Instant::now();
        // An expiration too far out to represent never expires.
        let expires_at = self.expiration.and_then(|exp| now.checked_add(exp));

        match self.buckets.entry(identifier.to_owned()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let slot = occupied.get_mut();
                let allowed = slot.bucket.try_acquire(now);
                slot.expires_at = expires_at;

                if !allowed {
                    debug!(
                        identifier = %identifier,
                        retry_after = ?slot.bucket.time_to_next_token(now),
                        "Local rate limit exceeded"
                    );
                }
                allowed
            }
            entry => {
                // The request that creates a bucket is always admitted, even
                // though it spends one of the bucket's tokens.
                let mut bucket = TokenBucket::new(limit, window, now);
                bucket.try_acquire(now);

                debug!(
                    identifier = %identifier,
                    limit = limit,
                    window = ?window,
                    "Creating new token bucket"
                );
                entry.insert(Slot { bucket, expires_at });
                true
            }
        }
    }

    /// Get the tokens consumed by a live bucket.
    ///
    /// Returns `None` if the identifier has no bucket or it has gone idle.
    pub fn consumed(&self, identifier: &str) -> Option<u64> {
        let now = Instant::now();
        self.buckets
            .get(identifier)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.bucket.consumed())
    }

    /// Get the number of buckets held, idle ones not yet swept included.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Periodically remove idle buckets until the store is dropped.
async fn sweep(buckets: Weak<Buckets>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(buckets) = buckets.upgrade() else {
            return;
        };

        let now = Instant::now();
        let before = buckets.len();
        buckets.retain(|_, slot| !slot.is_expired(now));
        let evicted = before.saturating_sub(buckets.len());

        if evicted > 0 {
            trace!(evicted = evicted, remaining = buckets.len(), "Swept idle token buckets");
        }
    }
}

#[async_trait]
impl RateLimiterStore for LocalStore {
    async fn allow(
        &self,
        _ctx: &CallContext,
        identifier: &str,
        window: chrono::Duration,
        limit: i64,
    ) -> Result<bool, StoreError> {
        if is_bypass(window, limit) {
            return Ok(true);
        }

        // A positive chrono duration always converts.
        let window = window.to_std().unwrap_or(Duration::MAX);

        trace!(identifier = %identifier, limit = limit, "Checking local rate limit");
        Ok(self.acquire(identifier, window, limit as u64))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
