//! Redis-backed counter store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{
    Client, ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo, RedisResult,
};
use tracing::{debug, info};

use super::{ttl_millis, CounterStore, StoreError};
use crate::config::RedisConfig;

/// Counter store backed by a Redis server.
///
/// Every command runs under `command_timeout` so a slow or wedged server can
/// only delay a request by a bounded amount.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis, giving up after the configured probe timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(connection_info(config)?)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        debug!(timeout = ?config.probe_timeout, "Connecting to Redis");

        let connection = tokio::time::timeout(config.probe_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout {
                op: "CONNECT",
                timeout: config.probe_timeout,
            })?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!("Connected to Redis");

        Ok(Self {
            connection,
            command_timeout: config.command_timeout,
        })
    }

    /// Run a single command under the command deadline.
    async fn bounded<T, F>(&self, op: &'static str, command: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e))
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() =>
            {
                Err(StoreError::Connection(e.to_string()))
            }
            Ok(Err(e)) => Err(StoreError::Command {
                op,
                message: e.to_string(),
            }),
            Err(_) => Err(StoreError::Timeout {
                op,
                timeout: self.command_timeout,
            }),
        }
    }
}

/// Connection parameters for `config`.
///
/// A URL is parsed as given. Otherwise the parts are used directly, so a
/// password needs no escaping.
fn connection_info(config: &RedisConfig) -> Result<ConnectionInfo, StoreError> {
    if let Some(url) = config.url.as_deref().filter(|u| !u.trim().is_empty()) {
        return url
            .into_connection_info()
            .map_err(|e| StoreError::Connection(format!("Invalid Redis URL: {e}")));
    }

    let host = config.host.as_deref().unwrap_or("127.0.0.1").to_string();
    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, config.port),
        redis: RedisConnectionInfo {
            db: config.db,
            password: config.password.clone().filter(|p| !p.is_empty()),
            ..Default::default()
        },
    })
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.connection.clone();
        self.bounded("GET", async move {
            redis::cmd("GET").arg(key).query_async::<Option<i64>>(&mut conn).await
        })
        .await
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.bounded("SET", async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        self.bounded("DECR", async move {
            redis::cmd("DECR").arg(key).query_async::<i64>(&mut conn).await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.connection.clone();
        let millis = self
            .bounded("PTTL", async move {
                redis::cmd("PTTL").arg(key).query_async::<i64>(&mut conn).await
            })
            .await?;

        // -2: no such key, -1: key without expiry
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.bounded("PEXPIRE", async move {
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(ttl_millis(ttl))
                .query_async::<i64>(&mut conn)
                .await
        })
        .await
        .map(|_| ())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.bounded("PING", async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }
}
