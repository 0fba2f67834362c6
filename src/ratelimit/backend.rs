//! Rate limiter store trait shared by the local and shared implementations.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

/// Errors a store can return instead of a verdict.
///
/// None of these mean "admit" or "reject"; the admission coordinator decides
/// what a failed check turns into.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The shared store could not be reached or refused the command
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store is not usable for a reason other than a Redis error
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The caller's deadline passed before the store answered
    #[error("Store call exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// The store answered with something that is not a token bucket reply
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

impl StoreError {
    /// Short, stable name of the failure, safe to hand back to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Redis(_) => "redis_error",
            StoreError::Unavailable(_) => "unavailable",
            StoreError::DeadlineExceeded(_) => "deadline_exceeded",
            StoreError::UnexpectedReply(_) => "unexpected_reply",
        }
    }
}

/// Per-call execution context.
///
/// Dropping the future returned by [`RateLimiterStore::allow`] cancels the
/// call; the deadline bounds how long a blocking store may take.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    ///
    /// A timeout too large to represent as an instant means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The earlier of this context's deadline and `now + timeout`.
    ///
    /// `None` only when there is no deadline and `now + timeout` overflows.
    pub fn deadline_within(&self, timeout: Duration) -> Option<Instant> {
        match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(deadline), Some(bound)) => Some(deadline.min(bound)),
            (deadline, bound) => deadline.or(bound),
        }
    }
}

/// Returns `true` when the window or limit switches limiting off.
///
/// Non-positive values are a configuration escape hatch, not an error.
pub fn is_bypass(window: chrono::Duration, limit: i64) -> bool {
    window <= chrono::Duration::zero() || limit <= 0
}

/// Trait for rate limiter store implementations.
///
/// This trait abstracts over the in-process [`LocalStore`](super::LocalStore)
/// and the Redis-backed [`SharedStore`](super::SharedStore) so the admission
/// coordinator can hold either behind an `Arc<dyn RateLimiterStore>`.
#[async_trait]
pub trait RateLimiterStore: Send + Sync {
    /// Decide whether one more request for `identifier` fits in a token
    /// bucket of `limit` tokens refilled every `window`.
    ///
    /// Returns `Ok(true)` without touching state when [`is_bypass`] holds.
    /// Concurrent calls for the same identifier never lose or double-count
    /// tokens.
    async fn allow(
        &self,
        ctx: &CallContext,
        identifier: &str,
        window: chrono::Duration,
        limit: i64,
    ) -> Result<bool, StoreError>;

    /// Short name of the store, for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_on_non_positive_inputs() {
        let second = chrono::Duration::seconds(1);

        assert!(is_bypass(chrono::Duration::zero(), 5));
        assert!(is_bypass(chrono::Duration::seconds(-1), 5));
        assert!(is_bypass(second, 0));
        assert!(is_bypass(second, -3));
        assert!(!is_bypass(second, 5));
        assert!(!is_bypass(chrono::Duration::milliseconds(1), 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_within_picks_earliest() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        let deadline = ctx.deadline().unwrap();

        assert_eq!(ctx.deadline_within(Duration::from_secs(1)), Some(deadline));
        assert!(ctx.deadline_within(Duration::from_millis(10)).unwrap() < deadline);

        let background = CallContext::background();
        assert!(background.deadline().is_none());
        assert_eq!(
            background.deadline_within(Duration::from_millis(10)),
            Some(Instant::now() + Duration::from_millis(10))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_means_no_deadline() {
        let ctx = CallContext::with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(ctx.deadline_within(Duration::MAX).is_none());

        // a finite store timeout still bounds the call
        assert_eq!(
            ctx.deadline_within(Duration::from_millis(100)),
            Some(Instant::now() + Duration::from_millis(100))
        );

        // and a finite caller deadline wins over an unbounded store timeout
        let bounded = CallContext::with_timeout(Duration::from_millis(20));
        assert_eq!(bounded.deadline_within(Duration::MAX), bounded.deadline());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(StoreError::Unavailable("down".into()).kind(), "unavailable");
        assert_eq!(
            StoreError::DeadlineExceeded(Duration::from_millis(5)).kind(),
            "deadline_exceeded"
        );
        assert_eq!(StoreError::UnexpectedReply("?".into()).kind(), "unexpected_reply");
    }
}
