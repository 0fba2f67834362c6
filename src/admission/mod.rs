//! Per-request admission control.
//!
//! A request is first checked against the path selector, then keyed by
//! caller identity, then charged against the configured rate limiter store.

mod coordinator;
mod identity;
mod outcome;
mod path;
mod request;

pub use coordinator::AdmissionController;
pub use identity::{Quota, QuotaLimits, QuotaSource};
pub use outcome::{Admission, BypassReason, Reason, Rejection};
pub use path::{matches_any, PathSelector, Skipper};
pub use request::AdmissionRequest;
