//! Gatekeeper - Request Admission Service
//!
//! This crate decides, per inbound HTTP request, whether the caller is still
//! within quota. Quotas are token buckets keyed by authenticated user id or
//! client address, kept either in process or in a Redis shared by every
//! instance. The decision is exposed as a library and as a gRPC service.

pub mod admission;
pub mod config;
pub mod error;
pub mod grpc;
pub mod kv;
pub mod ratelimit;
