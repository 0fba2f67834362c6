//! Shared rate limiter store backed by Redis.
//!
//! Every instance pointing at the same Redis draws from the same buckets,
//! giving approximate cross-instance quotas at the cost of one network round
//! trip per check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::{is_bypass, CallContext, RateLimiterStore, StoreError};
use crate::config::SharedStoreConfig;
use crate::kv::{GcraClient, GcraLimit, RedisGcra};

/// Derive the per-second rate handed to the shared store.
///
/// The window is truncated to whole seconds and the limit is divided by it
/// with integer division. A sub-second window yields `None`; a limit smaller
/// than the window in seconds yields `Some(0)`. Both mean no request can be
/// admitted.
pub fn per_second_rate(window: chrono::Duration, limit: i64) -> Option<u64> {
    let window_secs = u64::try_from(window.num_seconds()).ok()?;
    let limit = u64::try_from(limit).ok()?;
    limit.checked_div(window_secs)
}

/// A rate limiter store whose token buckets live in a shared Redis.
pub struct SharedStore {
    /// Executes the token bucket atomically on the store
    client: Arc<dyn GcraClient>,
    /// Prepended to identifiers to form store keys
    key_prefix: String,
    /// Upper bound on one round trip when the caller has a later deadline
    timeout: Duration,
}

impl SharedStore {
    /// Connect to the configured Redis.
    ///
    /// An unreachable store is an error here rather than on the first check.
    pub async fn connect(config: &SharedStoreConfig) -> Result<Self, StoreError> {
        let client = RedisGcra::connect(config).await?;
        Ok(Self::with_client(Arc::new(client), config))
    }

    /// Create a shared store on top of an existing GCRA client.
    pub fn with_client(client: Arc<dyn GcraClient>, config: &SharedStoreConfig) -> Self {
        Self {
            client,
            key_prefix: config.key_prefix.clone(),
            timeout: config.timeout(),
        }
    }

    /// The store key for an identifier.
    pub fn key_for(&self, identifier: &str) -> String {
        format!("{}{}", self.key_prefix, identifier)
    }
}

#[async_trait]
impl RateLimiterStore for SharedStore {
    async fn allow(
        &self,
        ctx: &CallContext,
        identifier: &str,
        window: chrono::Duration,
        limit: i64,
    ) -> Result<bool, StoreError> {
        if is_bypass(window, limit) {
            return Ok(true);
        }

        let rate = match per_second_rate(window, limit) {
            Some(rate) if rate > 0 => rate,
            _ => {
                debug!(
                    identifier = %identifier,
                    window = %window,
                    limit = limit,
                    "Shared rate rounds down to zero; refusing request"
                );
                return Ok(false);
            }
        };

        let key = self.key_for(identifier);
        let limit = GcraLimit::per_second(rate);
        let call = self.client.allow_n(&key, &limit, 1);

        trace!(key = %key, rate = rate, "Checking shared rate limit");

        let reply = match ctx.deadline_within(self.timeout) {
            Some(deadline) => {
                let started = tokio::time::Instant::now();
                tokio::time::timeout_at(deadline, call).await.map_err(|_| {
                    StoreError::DeadlineExceeded(deadline.saturating_duration_since(started))
                })??
            }
            None => call.await?,
        };

        let admitted = reply.allowed > 0;
        if admitted {
            trace!(key = %key, remaining = reply.remaining, "Shared rate limit admitted");
        } else {
            debug!(
                key = %key,
                remaining = reply.remaining,
                retry_after = ?reply.retry_after,
                reset_after = ?reply.reset_after,
                "Shared rate limit exceeded"
            );
        }

        Ok(admitted)
    }

    fn name(&self) -> &'static str {
        "shared"
    }
}
