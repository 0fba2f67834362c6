//! Admission coordinator.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use super::identity::{Quota, QuotaLimits};
use super::outcome::{Admission, BypassReason, Reason, Rejection};
use super::path::PathSelector;
use super::request::AdmissionRequest;
use crate::config::{RateLimitingConfig, StoreType};
use crate::error::Result;
use crate::ratelimit::{is_bypass, per_second_rate, CallContext, LocalStore, RateLimiterStore, SharedStore};

/// Turns scope, identity and store verdict into an [`Admission`].
///
/// This struct holds no per-request state and can be shared across tasks.
pub struct AdmissionController {
    /// `None` when rate limiting is disabled
    store: Option<Arc<dyn RateLimiterStore>>,
    selector: PathSelector,
    window: chrono::Duration,
    limits: QuotaLimits,
}

impl AdmissionController {
    /// Create a controller that charges requests against `store`.
    ///
    /// The `enable` flag is honored: a disabled configuration admits
    /// everything and never calls the store.
    pub fn new(config: &RateLimitingConfig, store: Arc<dyn RateLimiterStore>) -> Self {
        Self {
            store: config.enable.then_some(store),
            selector: PathSelector::new(
                config.allowed_path_prefixes.clone(),
                config.skipped_path_prefixes.clone(),
            ),
            window: config.window(),
            limits: QuotaLimits {
                per_user: config.max_requests_per_user,
                per_address: config.max_requests_per_ip,
            },
        }
    }

    /// A controller that admits every request.
    pub fn disabled() -> Self {
        Self {
            store: None,
            selector: PathSelector::default(),
            window: chrono::Duration::zero(),
            limits: QuotaLimits {
                per_user: 0,
                per_address: 0,
            },
        }
    }

    /// Build the configured store and a controller around it.
    ///
    /// A shared store is connected here, so an unreachable Redis fails
    /// startup instead of the first request.
    pub async fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        if !config.enable {
            info!("Rate limiting disabled");
            return Ok(Self::disabled());
        }

        let store: Arc<dyn RateLimiterStore> = match config.store_type {
            StoreType::Local => Arc::new(LocalStore::new(&config.local)),
            StoreType::Shared => {
                warn_on_lossy_rates(config);
                Arc::new(SharedStore::connect(&config.shared).await?)
            }
        };

        info!(
            store = store.name(),
            window = %config.window(),
            max_requests_per_ip = config.max_requests_per_ip,
            max_requests_per_user = config.max_requests_per_user,
            "Rate limiter initialized"
        );

        Ok(Self::new(config, store))
    }

    /// Replace the path selector's custom skip predicate.
    pub fn with_skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&AdmissionRequest) -> bool + Send + Sync + 'static,
    {
        self.selector = self.selector.with_skipper(skipper);
        self
    }

    /// Returns `true` if requests are being limited.
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Decide whether a request may continue.
    pub async fn check(&self, request: &AdmissionRequest) -> Admission {
        let Some(store) = &self.store else {
            return Admission::Bypassed(BypassReason::Disabled);
        };

        if !self.selector.in_scope(request) {
            trace!(path = %request.path, "Path out of scope; skipping rate limit");
            return Admission::Bypassed(BypassReason::OutOfScope);
        }

        let quota = Quota::resolve(request, &self.limits);
        let ctx = request
            .deadline
            .map(CallContext::with_deadline)
            .unwrap_or_default();

        match store
            .allow(&ctx, &quota.identifier, self.window, quota.limit)
            .await
        {
            Ok(true) => {
                trace!(quota = %quota, "Request admitted");
                Admission::Admitted
            }
            Ok(false) => {
                debug!(quota = %quota, path = %request.path, "Too many requests");
                Admission::Rejected(Rejection::new(Reason::TooManyRequests))
            }
            Err(e) => {
                error!(
                    quota = %quota,
                    store = store.name(),
                    error = %e,
                    "Rate limiter store failed"
                );
                Admission::Failed(Rejection::store_failure(&e))
            }
        }
    }
}

/// The shared store truncates `limit / window` to whole requests per second.
fn warn_on_lossy_rates(config: &RateLimitingConfig) {
    let window = config.window();
    for (kind, limit) in [
        ("per_ip", config.max_requests_per_ip),
        ("per_user", config.max_requests_per_user),
    ] {
        if is_bypass(window, limit) {
            continue;
        }
        if per_second_rate(window, limit).unwrap_or(0) == 0 {
            warn!(
                limit_kind = kind,
                limit = limit,
                window = %window,
                "Shared store rate rounds down to zero requests per second; every request will be rejected"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalStoreConfig, SharedStoreConfig};
    use crate::ratelimit::{HangingGcra, MemoryGcra, UnreachableGcra};
    use std::net::IpAddr;
    use std::sync::atomic::Ordering;

    fn config(per_ip: i64, per_user: i64) -> RateLimitingConfig {
        RateLimitingConfig {
            period_secs: 60,
            max_requests_per_ip: per_ip,
            max_requests_per_user: per_user,
            ..Default::default()
        }
    }

    fn local_controller(config: &RateLimitingConfig) -> (AdmissionController, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::new(&LocalStoreConfig::default()));
        let controller = AdmissionController::new(config, store.clone());
        (controller, store)
    }

    fn request(path: &str, addr: &str) -> AdmissionRequest {
        AdmissionRequest::new(path, addr.parse::<IpAddr>().unwrap())
    }

    #[tokio::test]
    async fn test_disabled_admits_everything() {
        let mut cfg = config(1, 1);
        cfg.enable = false;
        let (controller, store) = local_controller(&cfg);

        for _ in 0..5 {
            let admission = controller.check(&request("/api", "10.0.0.1")).await;
            assert_eq!(admission, Admission::Bypassed(BypassReason::Disabled));
        }
        assert!(!controller.is_enabled());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_scope_paths_skip_the_store() {
        let mut cfg = config(1, 1);
        cfg.allowed_path_prefixes = vec!["/api".to_string()];
        cfg.skipped_path_prefixes = vec!["/api/health".to_string()];
        let (controller, store) = local_controller(&cfg);

        assert_eq!(
            controller.check(&request("/static/app.js", "10.0.0.1")).await,
            Admission::Bypassed(BypassReason::OutOfScope)
        );
        assert_eq!(
            controller.check(&request("/api/health", "10.0.0.1")).await,
            Admission::Bypassed(BypassReason::OutOfScope)
        );
        assert!(store.is_empty());

        assert_eq!(controller.check(&request("/api/orders", "10.0.0.1")).await, Admission::Admitted);
    }

    #[tokio::test]
    async fn test_skipper_bypasses_limiting() {
        let (controller, store) = local_controller(&config(1, 1));
        let controller = controller.with_skipper(|req| req.path == "/internal");

        for _ in 0..3 {
            assert_eq!(
                controller.check(&request("/internal", "10.0.0.1")).await,
                Admission::Bypassed(BypassReason::OutOfScope)
            );
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_when_quota_exhausted() {
        let (controller, _store) = local_controller(&config(2, 10));
        let req = request("/api", "192.0.2.7");

        assert_eq!(controller.check(&req).await, Admission::Admitted);
        assert_eq!(controller.check(&req).await, Admission::Admitted);

        let admission = controller.check(&req).await;
        assert_eq!(admission, Admission::Rejected(Rejection::new(Reason::TooManyRequests)));
        assert_eq!(admission.rejection().unwrap().message, "too many requests");
    }

    #[tokio::test]
    async fn test_identity_selects_bucket_and_limit() {
        let (controller, store) = local_controller(&config(1, 3));

        // Anonymous: keyed by address with the per-address limit
        let anonymous = request("/api", "198.51.100.4");
        assert_eq!(controller.check(&anonymous).await, Admission::Admitted);
        assert!(!controller.check(&anonymous).await.is_continue());
        assert_eq!(store.consumed("198.51.100.4"), Some(1));

        // Same address, now authenticated: its own bucket with the user limit
        let user = anonymous.clone().with_user_id(77);
        for _ in 0..3 {
            assert_eq!(controller.check(&user).await, Admission::Admitted);
        }
        assert!(!controller.check(&user).await.is_continue());
        assert_eq!(store.consumed("77"), Some(3));
        assert_eq!(store.consumed("198.51.100.4"), Some(1));
    }

    #[tokio::test]
    async fn test_non_positive_limit_disables_per_kind() {
        let (controller, store) = local_controller(&config(0, 1));

        for _ in 0..5 {
            assert_eq!(controller.check(&request("/api", "10.0.0.9")).await, Admission::Admitted);
        }
        assert!(store.is_empty());
    }

    fn per_second(per_ip: i64, per_user: i64) -> RateLimitingConfig {
        RateLimitingConfig {
            period_secs: 1,
            ..config(per_ip, per_user)
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_rejection() {
        let gcra = Arc::new(UnreachableGcra::default());
        let store = Arc::new(SharedStore::with_client(gcra.clone(), &SharedStoreConfig::default()));
        let controller = AdmissionController::new(&per_second(5, 5), store);

        let admission = controller.check(&request("/api", "10.0.0.1")).await;

        assert_eq!(gcra.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(admission, Admission::Failed(_)));
        let rejection = admission.rejection().unwrap();
        assert_eq!(rejection.reason, Reason::StoreUnavailable);
        assert_eq!(rejection.reason.http_status(), 500);
        assert_eq!(rejection.message, "rate limiter unavailable: unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_store_admits_then_rejects() {
        let gcra = Arc::new(MemoryGcra::default());
        let store = Arc::new(SharedStore::with_client(gcra.clone(), &SharedStoreConfig::default()));
        let controller = AdmissionController::new(&per_second(2, 10), store);
        let req = request("/api", "192.0.2.44");

        assert_eq!(controller.check(&req).await, Admission::Admitted);
        assert_eq!(controller.check(&req).await, Admission::Admitted);
        assert_eq!(
            controller.check(&req).await,
            Admission::Rejected(Rejection::new(Reason::TooManyRequests))
        );

        let calls = gcra.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0, "rate:192.0.2.44");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_store_deadline_is_a_failure() {
        let store = Arc::new(SharedStore::with_client(
            Arc::new(HangingGcra),
            &SharedStoreConfig::default(),
        ));
        let controller = AdmissionController::new(&per_second(5, 5), store);
        let req = request("/api", "10.0.0.1")
            .with_deadline(tokio::time::Instant::now() + std::time::Duration::from_millis(20));

        let admission = controller.check(&req).await;

        assert!(matches!(admission, Admission::Failed(_)));
        assert_eq!(
            admission.rejection().unwrap().message,
            "rate limiter unavailable: deadline_exceeded"
        );
    }

    #[tokio::test]
    async fn test_from_config_local() {
        let controller = AdmissionController::from_config(&config(1, 1)).await.unwrap();
        assert!(controller.is_enabled());
        assert_eq!(controller.check(&request("/", "10.0.0.1")).await, Admission::Admitted);
    }

    #[tokio::test]
    async fn test_from_config_disabled_skips_store_setup() {
        let mut cfg = config(1, 1);
        cfg.enable = false;
        // Would fail to connect if the store were built
        cfg.store_type = StoreType::Shared;
        cfg.shared.addr = "not-an-address".to_string();

        let controller = AdmissionController::from_config(&cfg).await.unwrap();
        assert!(!controller.is_enabled());
    }

    #[tokio::test]
    async fn test_from_config_shared_fails_fast() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut cfg = config(1, 1);
        cfg.store_type = StoreType::Shared;
        cfg.shared.addr = addr.to_string();
        cfg.shared.connect_timeout_ms = 300;

        assert!(AdmissionController::from_config(&cfg).await.is_err());
    }
}
