//! Shared key-value store access.
//!
//! Quotas shared by several Gatekeeper instances live in Redis. Each check
//! runs a GCRA token bucket as a Lua script, so the read-compute-write on a
//! bucket is atomic on the server and needs no client-side locking.

mod client;
mod gcra;

pub use client::RedisGcra;
pub use gcra::{GcraClient, GcraLimit, GcraReply, GCRA_SCRIPT};
