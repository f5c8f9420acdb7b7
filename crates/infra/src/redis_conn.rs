//! Lazily (re)established multiplexed Redis connection shared by the Redis adapters.

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Holds a [`MultiplexedConnection`] that is opened on first use and dropped
/// whenever a command reports a connection-level failure.
///
/// Clones of the connection share one TCP socket, so callers clone per command.
pub struct RedisConnector {
    client: Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisConnector {
    pub fn open(redis_url: &str) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(redis_url)?,
            conn: Mutex::new(None),
        })
    }

    pub async fn connection(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        info!("redis connection established");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the cached connection; the next call reconnects.
    pub async fn invalidate(&self) {
        if self.conn.lock().await.take().is_some() {
            warn!("redis connection dropped");
        }
    }

    /// Drop the cached connection if `err` means the socket is gone.
    pub async fn observe(&self, err: &RedisError) {
        if is_connection_error(err) {
            self.invalidate().await;
        }
    }

    pub async fn ping(&self) -> Result<(), RedisError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

pub fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}
