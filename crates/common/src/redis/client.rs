use crate::redis::RedisConfig;
use anyhow::{anyhow, Context, Result};
use redis::aio::ConnectionManager;
use redis::RedisResult;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Shared handle to the fast-path store.
///
/// Wraps a multiplexed `ConnectionManager`, which reconnects on its own and is
/// cheap to clone per call.
#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
    response_timeout: Duration,
}

impl RedisClient {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .with_context(|| format!("invalid redis url: {}", config.url))?;

        let connection = tokio::time::timeout(
            config.connection_timeout(),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| {
            anyhow!(
                "timed out connecting to redis after {}ms",
                config.connection_timeout_ms
            )
        })?
        .context("failed to connect to redis")?;

        info!(url = %config.url, "connected to redis");

        Ok(Self {
            connection,
            response_timeout: config.response_timeout(),
        })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Await a redis call, failing it once the response timeout elapses
    pub async fn timed<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        tokio::time::timeout(self.response_timeout, call)
            .await
            .map_err(|_| {
                anyhow!(
                    "redis response timed out after {}ms",
                    self.response_timeout.as_millis()
                )
            })?
            .map_err(anyhow::Error::from)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let pong: String = self
            .timed(redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!(reply = %pong, "redis ping");
        Ok(())
    }
}
