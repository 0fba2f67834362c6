//! Redis client running the GCRA script.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Script};
use tracing::{debug, info};

use super::gcra::{GcraClient, GcraLimit, GcraReply, GCRA_SCRIPT};
use crate::config::SharedStoreConfig;
use crate::ratelimit::StoreError;

/// GCRA client backed by a multiplexed, auto-reconnecting Redis connection.
pub struct RedisGcra {
    conn: ConnectionManager,
    script: Script,
    /// `host:port`, for logs
    addr: String,
}

impl std::fmt::Debug for RedisGcra {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisGcra")
            .field("addr", &self.addr)
            .field("script", &self.script.get_hash())
            .finish()
    }
}

impl RedisGcra {
    /// Connect to the configured Redis and verify it answers.
    ///
    /// Fails if the server cannot be reached within the connect timeout, so
    /// a misconfigured store is reported at startup rather than on the first
    /// request.
    pub async fn connect(config: &SharedStoreConfig) -> Result<Self, StoreError> {
        info!(
            addr = %config.addr,
            db = config.db,
            "Connecting to shared rate limit store"
        );

        let client = redis::Client::open(connection_info(config)?)?;
        let timeout = config.connect_timeout();

        let connect = async {
            let mut conn = ConnectionManager::new(client).await?;
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, StoreError>((conn, pong))
        };

        let (conn, pong) = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "no answer from {} within {:?}",
                    config.addr, timeout
                ))
            })??;

        debug!(reply = %pong, "Shared rate limit store answered PING");

        let script = Script::new(GCRA_SCRIPT);
        info!(addr = %config.addr, script = %script.get_hash(), "Connected to shared rate limit store");

        Ok(Self {
            conn,
            script,
            addr: config.addr.clone(),
        })
    }
}

#[async_trait]
impl GcraClient for RedisGcra {
    async fn allow_n(&self, key: &str, limit: &GcraLimit, cost: u32) -> Result<GcraReply, StoreError> {
        let mut conn = self.conn.clone();

        // EVALSHA, falling back to EVAL when the script is not cached yet
        let (allowed, remaining, retry_after, reset_after): (i64, i64, String, String) = self
            .script
            .key(key)
            .arg(limit.burst)
            .arg(limit.rate)
            .arg(limit.period.as_secs_f64())
            .arg(cost)
            .invoke_async(&mut conn)
            .await?;

        GcraReply::from_script(allowed, remaining, &retry_after, &reset_after)
    }
}

/// Build Redis connection parameters from `host:port`, credentials and db.
fn connection_info(config: &SharedStoreConfig) -> Result<ConnectionInfo, StoreError> {
    let (host, port) = split_host_port(&config.addr).ok_or_else(|| {
        StoreError::Unavailable(format!("invalid shared store address {:?}", config.addr))
    })?;

    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            db: config.db,
            username: config.username.clone(),
            password: config.password.clone(),
            ..Default::default()
        },
    })
}

/// Split `host:port`, accepting bracketed IPv6 hosts such as `[::1]:6379`.
fn split_host_port(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);

    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}
