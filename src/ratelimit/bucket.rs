//! Token bucket implementation.

use std::time::Duration;
use tokio::time::Instant;

/// A token bucket holding up to `limit` tokens, refilled continuously at
/// `limit` tokens per window.
///
/// The bucket is not synchronized; callers serialize access to it (the local
/// store keeps each bucket behind its map shard lock).
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum number of tokens (the burst size)
    capacity: f64,
    /// Tokens added per second
    refill_per_sec: f64,
    /// Tokens currently available
    tokens: f64,
    /// Last time tokens were added
    last_refill: Instant,
    /// Tokens taken over the bucket's lifetime
    consumed: u64,
}

impl TokenBucket {
    /// Create a full bucket. `window` must be non-zero.
    pub fn new(limit: u64, window: Duration, now: Instant) -> Self {
        debug_assert!(!window.is_zero(), "token bucket window must be non-zero");

        let capacity = limit as f64;
        Self {
            capacity,
            refill_per_sec: capacity / window.as_secs_f64(),
            tokens: capacity,
            last_refill: now,
            consumed: 0,
        }
    }

    /// Take one token if available.
    ///
    /// Returns `true` if a token was taken, `false` if the bucket is empty.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.consumed += 1;
            true
        } else {
            false
        }
    }

    /// Tokens available at `now`, without taking any.
    pub fn available(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity)
    }

    /// How long until at least one whole token is available.
    pub fn time_to_next_token(&self, now: Instant) -> Duration {
        let missing = 1.0 - self.available(now);
        if missing <= 0.0 || self.refill_per_sec <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(missing / self.refill_per_sec)
        }
    }

    /// Get the number of tokens taken since the bucket was created.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Get the bucket capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_bucket_is_full() {
        let now = Instant::now();
        let bucket = TokenBucket::new(5, Duration::from_secs(1), now);

        assert_eq!(bucket.capacity(), 5);
        assert_eq!(bucket.available(now), 5.0);
        assert_eq!(bucket.consumed(), 0);
    }

    #[test]
    fn test_burst_then_empty() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(5, Duration::from_secs(1), now);

        for _ in 0..5 {
            assert!(bucket.try_acquire(now));
        }

        // The 6th request finds the bucket empty
        assert!(!bucket.try_acquire(now));
        assert_eq!(bucket.consumed(), 5);
    }

    #[test]
    fn test_continuous_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10, Duration::from_secs(1), start);

        for _ in 0..10 {
            assert!(bucket.try_acquire(start));
        }
        assert!(!bucket.try_acquire(start));

        // 10 tokens per second: 250ms buys back two and a half tokens
        let later = start + Duration::from_millis(250);
        assert!(bucket.try_acquire(later));
        assert!(bucket.try_acquire(later));
        assert!(!bucket.try_acquire(later));
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(3, Duration::from_secs(1), start);
        assert!(bucket.try_acquire(start));

        let much_later = start + Duration::from_secs(3600);
        assert_eq!(bucket.available(much_later), 3.0);

        for _ in 0..3 {
            assert!(bucket.try_acquire(much_later));
        }
        assert!(!bucket.try_acquire(much_later));
    }

    #[test]
    fn test_time_to_next_token() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2, Duration::from_secs(2), start);
        assert_eq!(bucket.time_to_next_token(start), Duration::ZERO);

        bucket.try_acquire(start);
        bucket.try_acquire(start);

        // one token per second
        let wait = bucket.time_to_next_token(start);
        assert!(wait > Duration::from_millis(999) && wait <= Duration::from_secs(1));
    }
}
