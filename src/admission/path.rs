//! Path scoping for admission control.

use std::sync::Arc;

use super::request::AdmissionRequest;

/// Custom predicate; returning `true` takes the request out of scope.
pub type Skipper = Arc<dyn Fn(&AdmissionRequest) -> bool + Send + Sync>;

/// Returns `true` if `path` starts with any of `prefixes`.
///
/// Plain case-sensitive prefix comparison; no patterns.
pub fn matches_any<S: AsRef<str>>(path: &str, prefixes: &[S]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix.as_ref()))
}

/// Decides whether admission control applies to a request at all.
#[derive(Clone, Default)]
pub struct PathSelector {
    /// If non-empty, only these prefixes are in scope
    allowed: Vec<String>,
    /// These prefixes are never in scope
    skipped: Vec<String>,
    skipper: Option<Skipper>,
}

impl std::fmt::Debug for PathSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathSelector")
            .field("allowed", &self.allowed)
            .field("skipped", &self.skipped)
            .field("skipper", &self.skipper.is_some())
            .finish()
    }
}

impl PathSelector {
    pub fn new(allowed: Vec<String>, skipped: Vec<String>) -> Self {
        Self {
            allowed,
            skipped,
            skipper: None,
        }
    }

    /// Add a predicate that forces matching requests out of scope.
    pub fn with_skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&AdmissionRequest) -> bool + Send + Sync + 'static,
    {
        self.skipper = Some(Arc::new(skipper));
        self
    }

    /// Returns `true` if the request is subject to admission control.
    pub fn in_scope(&self, request: &AdmissionRequest) -> bool {
        if !self.allowed.is_empty() && !matches_any(&request.path, &self.allowed) {
            return false;
        }

        if matches_any(&request.path, &self.skipped) {
            return false;
        }

        match &self.skipper {
            Some(skipper) => !skipper(request),
            None => true,
        }
    }
}
