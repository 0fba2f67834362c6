//! GCRA token bucket protocol shared by the Redis client and its test doubles.

use std::time::Duration;

use async_trait::async_trait;

use crate::ratelimit::StoreError;

/// Lua implementation of the generic cell rate algorithm.
///
/// `KEYS[1]` is the bucket key. `ARGV` is `burst`, `rate`, `period` (seconds)
/// and `cost`. The reply is `{allowed, remaining, retry_after, reset_after}`;
/// the two durations are strings in seconds, `retry_after` is `-1` when the
/// request was allowed.
pub const GCRA_SCRIPT: &str = r#"
redis.replicate_commands()

local key = KEYS[1]
local burst = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local period = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local interval = period / rate
local increment = interval * cost
local burst_offset = interval * burst

-- seconds since 2017-01-01 keeps microsecond precision in a double
local epoch = 1483228800
local time = redis.call("TIME")
local now = (tonumber(time[1]) - epoch) + tonumber(time[2]) / 1000000

local tat = tonumber(redis.call("GET", key) or now)
if tat < now then
  tat = now
end

local new_tat = tat + increment
local diff = now - (new_tat - burst_offset)
if diff < 0 then
  return {0, 0, tostring(-diff), tostring(tat - now)}
end

local reset_after = new_tat - now
redis.call("SET", key, string.format("%.6f", new_tat), "PX", math.ceil(reset_after * 1000))
return {cost, math.floor(diff / interval), "-1", tostring(reset_after)}
"#;

/// Rate passed to the GCRA script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcraLimit {
    /// Requests emitted per period
    pub rate: u64,
    /// Requests that may be taken at once
    pub burst: u64,
    pub period: Duration,
}

impl GcraLimit {
    /// `rate` requests per second with an equal burst.
    pub fn per_second(rate: u64) -> Self {
        Self {
            rate,
            burst: rate,
            period: Duration::from_secs(1),
        }
    }
}

/// Outcome of one GCRA evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct GcraReply {
    /// Tokens granted; zero when the request was refused
    pub allowed: i64,
    /// Tokens left after this request
    pub remaining: i64,
    /// Time until a refused request could succeed
    pub retry_after: Option<Duration>,
    /// Time until the bucket is full again
    pub reset_after: Duration,
}

impl GcraReply {
    /// Build a reply from the raw script result.
    pub fn from_script(
        allowed: i64,
        remaining: i64,
        retry_after: &str,
        reset_after: &str,
    ) -> Result<Self, StoreError> {
        let retry_after = parse_seconds(retry_after)?;
        let reset_after = parse_seconds(reset_after)?;

        Ok(Self {
            allowed,
            remaining,
            retry_after: (retry_after >= 0.0).then(|| Duration::from_secs_f64(retry_after)),
            reset_after: Duration::from_secs_f64(reset_after.max(0.0)),
        })
    }
}

fn parse_seconds(raw: &str) -> Result<f64, StoreError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite())
        .ok_or_else(|| StoreError::UnexpectedReply(format!("not a duration in seconds: {raw:?}")))
}

/// Executes the GCRA primitive against some store.
#[async_trait]
pub trait GcraClient: Send + Sync {
    /// Atomically try to take `cost` tokens from the bucket at `key`.
    async fn allow_n(&self, key: &str, limit: &GcraLimit, cost: u32) -> Result<GcraReply, StoreError>;
}
