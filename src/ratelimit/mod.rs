//! Rate limiter stores and the token bucket they enforce.

mod backend;
mod bucket;
mod local;
mod shared;

pub use backend::{is_bypass, CallContext, RateLimiterStore, StoreError};
pub use bucket::TokenBucket;
pub use local::LocalStore;
pub use shared::{per_second_rate, SharedStore};

#[cfg(test)]
pub(crate) use shared::tests::{HangingGcra, MemoryGcra, UnreachableGcra};
