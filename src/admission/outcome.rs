//! Admission outcomes handed back to the pipeline.

use crate::ratelimit::StoreError;

/// Why a request was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The caller's quota is used up
    TooManyRequests,
    /// The quota store could not give a verdict
    StoreUnavailable,
}

impl Reason {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Reason::TooManyRequests => "too_many_requests",
            Reason::StoreUnavailable => "store_unavailable",
        }
    }

    /// HTTP status a pipeline should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Reason::TooManyRequests => 429,
            Reason::StoreUnavailable => 500,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Reason::TooManyRequests => "too many requests",
            Reason::StoreUnavailable => "rate limiter unavailable",
        }
    }
}

/// A stopped request: reason code plus a message for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: Reason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: Reason) -> Self {
        Self {
            reason,
            message: reason.message().to_string(),
        }
    }

    /// A [`Reason::StoreUnavailable`] rejection naming the kind of failure.
    ///
    /// Only the error kind is exposed; the full error stays in the logs.
    pub fn store_failure(err: &StoreError) -> Self {
        let reason = Reason::StoreUnavailable;
        Self {
            reason,
            message: format!("{}: {}", reason.message(), err.kind()),
        }
    }
}

/// Why admission control did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// Rate limiting is switched off
    Disabled,
    /// The path selector excluded the request
    OutOfScope,
}

/// The decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Not evaluated; continue processing
    Bypassed(BypassReason),
    /// Within quota; continue processing
    Admitted,
    /// Quota exhausted; abort with a rate-limited response
    Rejected(Rejection),
    /// No verdict could be reached; abort with a server error
    Failed(Rejection),
}

impl Admission {
    /// Returns `true` if the pipeline should keep processing the request.
    pub fn is_continue(&self) -> bool {
        matches!(self, Admission::Bypassed(_) | Admission::Admitted)
    }

    /// The rejection to send back, if the request is stopped.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Admission::Rejected(rejection) | Admission::Failed(rejection) => Some(rejection),
            _ => None,
        }
    }
}
