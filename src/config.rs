//! Configuration management for Gatekeeper.
//!
//! Configuration is layered with the `config` crate: built-in defaults, then an
//! optional YAML file, then `GATEKEEPER__*` environment overrides
//! (e.g. `GATEKEEPER__RATE_LIMITING__STORE_TYPE=shared`).

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};

/// Longest duration any timeout, expiration or sweep interval may be set to.
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Upper bound on a single admission check, store round trip included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Identifies this instance in logs when several share one quota store
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            request_timeout_ms: default_request_timeout(),
            instance_id: default_instance_id(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

fn default_request_timeout() -> u64 {
    250
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Which backing store enforces quotas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// In-process token buckets; precise only within one instance.
    #[default]
    #[serde(alias = "memory")]
    Local,
    /// Token buckets kept in a shared Redis, approximately global.
    #[serde(alias = "redis")]
    Shared,
}

/// Rate limiting configuration.
///
/// A non-positive `period_secs` or limit disables limiting for the affected
/// callers instead of being treated as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Only paths starting with one of these are limited (empty: all paths)
    #[serde(default)]
    pub allowed_path_prefixes: Vec<String>,

    /// Paths starting with one of these are never limited
    #[serde(default)]
    pub skipped_path_prefixes: Vec<String>,

    /// Quota window in seconds
    #[serde(default = "default_period")]
    pub period_secs: i64,

    /// Quota for anonymous callers, keyed by client address
    #[serde(default = "default_max_requests")]
    pub max_requests_per_ip: i64,

    /// Quota for authenticated callers, keyed by user id
    #[serde(default = "default_max_requests")]
    pub max_requests_per_user: i64,

    #[serde(default)]
    pub store_type: StoreType,

    #[serde(default)]
    pub local: LocalStoreConfig,

    #[serde(default)]
    pub shared: SharedStoreConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enable: default_enable(),
            allowed_path_prefixes: Vec::new(),
            skipped_path_prefixes: Vec::new(),
            period_secs: default_period(),
            max_requests_per_ip: default_max_requests(),
            max_requests_per_user: default_max_requests(),
            store_type: StoreType::default(),
            local: LocalStoreConfig::default(),
            shared: SharedStoreConfig::default(),
        }
    }
}

impl RateLimitingConfig {
    /// The quota window. Negative periods stay negative so they bypass limiting.
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.period_secs.clamp(-(i64::MAX / 1000), i64::MAX / 1000))
    }
}

fn default_enable() -> bool {
    true
}

fn default_period() -> i64 {
    1
}

fn default_max_requests() -> i64 {
    100
}

/// Local store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Idle time after which an identifier's bucket is dropped (0: never)
    #[serde(default = "default_expiration")]
    pub expiration_secs: u64,

    /// How often idle buckets are swept (0: only expire lazily on access)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            expiration_secs: default_expiration(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl LocalStoreConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn default_expiration() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Shared (Redis) store configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SharedStoreConfig {
    /// `host:port` of the Redis server
    #[serde(default = "default_shared_addr")]
    pub addr: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Redis database index
    #[serde(default)]
    pub db: i64,

    /// Per-call timeout for the token bucket round trip
    #[serde(default = "default_shared_timeout")]
    pub timeout_ms: u64,

    /// Bound on connecting to the store at startup
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Prefix prepended to every identifier to form the Redis key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for SharedStoreConfig {
    fn default() -> Self {
        Self {
            addr: default_shared_addr(),
            username: None,
            password: None,
            db: 0,
            timeout_ms: default_shared_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl std::fmt::Debug for SharedStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStoreConfig")
            .field("addr", &self.addr)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("timeout_ms", &self.timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl SharedStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_shared_addr() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_shared_timeout() -> u64 {
    100
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_key_prefix() -> String {
    "rate:".to_string()
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("GATEKEEPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject durations that cannot be added to the current time.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        let durations = [
            ("server.request_timeout_ms", self.server.request_timeout()),
            ("rate_limiting.local.expiration_secs", rl.local.expiration()),
            ("rate_limiting.local.cleanup_interval_secs", rl.local.cleanup_interval()),
            ("rate_limiting.shared.timeout_ms", rl.shared.timeout()),
            ("rate_limiting.shared.connect_timeout_ms", rl.shared.connect_timeout()),
        ];

        for (field, value) in durations {
            if value > MAX_DURATION {
                return Err(GatekeeperError::Config(format!(
                    "{} is {:?}, above the maximum of {:?}",
                    field, value, MAX_DURATION
                )));
            }
        }
        Ok(())
    }
}
