//! Redis Streams-backed broker (durable, at-least-once delivery).
//!
//! Each lane maps to two streams, one per priority tier, read through a single
//! consumer group:
//!
//! - **Stream keys**: `bookforge:lane:<lane>:p1` (high) and `...:p0` (normal)
//! - **Consumer group**: `bookforge-workers`, one named consumer per worker
//! - **Fetch order**: this consumer's own unacknowledged entries (left behind
//!   by a dropped connection), then new high, then new normal, then entries
//!   idle longer than the pending timeout on other consumers (`XAUTOCLAIM`)
//! - **Settling**: ack = `XACK` + `XDEL`; requeue = re-`XADD` with the attempt
//!   counter advanced, in the same `MULTI` as the `XACK`/`XDEL`

use async_trait::async_trait;
use bookforge_core::Priority;
use bookforge_events::{Broker, BrokerError, Delivery, Lane, OutboundMessage};
use redis::RedisError;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamRangeReply, StreamReadReply};
use tracing::{debug, instrument, warn};

use crate::redis_conn::{RedisConnector, is_connection_error};

const DEFAULT_KEY_PREFIX: &str = "bookforge:lane:";

const DEFAULT_GROUP: &str = "bookforge-workers";

/// Entries idle this long on another consumer are reclaimed.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

const TIERS: [Priority; 2] = [Priority::High, Priority::Normal];

pub struct RedisStreamsBroker {
    connector: RedisConnector,
    key_prefix: String,
    group: String,
    pending_timeout_ms: u64,
}

impl RedisStreamsBroker {
    /// Create a broker for `redis_url`. No connection is made until first use.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, BrokerError> {
        let connector = RedisConnector::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(Self {
            connector,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            group: DEFAULT_GROUP.to_string(),
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_pending_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.pending_timeout_ms = timeout_ms;
        self
    }

    fn stream_key(&self, lane: &Lane, priority: Priority) -> String {
        format!("{}{}:p{}", self.key_prefix, lane.name(), priority.level())
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        match self.connector.connection().await {
            Ok(conn) => Ok(conn),
            Err(err) => Err(self.fail(err, "connect").await),
        }
    }

    async fn fail(&self, err: RedisError, op: &str) -> BrokerError {
        self.connector.observe(&err).await;
        if is_connection_error(&err) {
            BrokerError::Unavailable(format!("{op}: {err}"))
        } else if err.code() == Some("NOGROUP") {
            BrokerError::UnknownLane(format!("{op}: {err}"))
        } else {
            BrokerError::Command(format!("{op}: {err}"))
        }
    }

    /// `XREADGROUP ... COUNT 1 STREAMS key <id>`; `id` is `>` for new entries,
    /// `0` for this consumer's pending ones.
    async fn read_group(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
        consumer: &str,
        id: &str,
    ) -> Result<Option<StreamId>, BrokerError> {
        let result: Result<Option<StreamReadReply>, RedisError> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(key)
            .arg(id)
            .query_async(conn)
            .await;

        match result {
            Ok(reply) => Ok(reply
                .and_then(|r| r.keys.into_iter().next())
                .and_then(|k| k.ids.into_iter().next())
                .filter(|entry| !entry.map.is_empty())),
            Err(err) => Err(self.fail(err, "XREADGROUP").await),
        }
    }

    async fn reclaim_stale(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
        consumer: &str,
    ) -> Result<Option<StreamId>, BrokerError> {
        let result: Result<redis::Value, RedisError> = redis::cmd("XAUTOCLAIM")
            .arg(key)
            .arg(&self.group)
            .arg(consumer)
            .arg(self.pending_timeout_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(conn)
            .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => return Err(self.fail(err, "XAUTOCLAIM").await),
        };

        let redis::Value::Bulk(parts) = reply else {
            return Ok(None);
        };
        let claimed = parts
            .get(1)
            .and_then(|v| redis::from_redis_value::<StreamRangeReply>(v).ok())
            .and_then(|r| r.ids.into_iter().next())
            .filter(|entry| !entry.map.is_empty());

        if let Some(entry) = &claimed {
            warn!(stream = %key, entry_id = %entry.id, "reclaimed stale delivery");
        }
        Ok(claimed)
    }

    fn to_delivery(&self, lane: &Lane, priority: Priority, entry: StreamId) -> Option<Delivery> {
        let Some(payload) = entry.get::<Vec<u8>>("payload") else {
            warn!(lane = %lane, entry_id = %entry.id, "stream entry without payload");
            return None;
        };
        let attempt = entry.get::<u32>("attempt").unwrap_or(1);
        Some(Delivery::new(
            lane.clone(),
            format!("{}|{}", priority.level(), entry.id),
            payload,
            priority,
            attempt,
        ))
    }

    fn parse_tag(&self, delivery: &Delivery) -> Result<(String, String), BrokerError> {
        let (level, entry_id) = delivery
            .tag()
            .split_once('|')
            .ok_or_else(|| BrokerError::UnknownDelivery(delivery.tag().to_string()))?;
        let level: u8 = level
            .parse()
            .map_err(|_| BrokerError::UnknownDelivery(delivery.tag().to_string()))?;
        Ok((
            self.stream_key(delivery.lane(), Priority::from_level(level)),
            entry_id.to_string(),
        ))
    }
}

#[async_trait]
impl Broker for RedisStreamsBroker {
    async fn declare_lane(&self, lane: &Lane) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        for priority in TIERS {
            let key = self.stream_key(lane, priority);
            // MKSTREAM creates the stream; BUSYGROUP means it was already declared.
            let result: Result<(), RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&key)
                .arg(&self.group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            match result {
                Ok(()) => debug!(stream = %key, "consumer group created"),
                Err(err) if err.code() == Some("BUSYGROUP") => {}
                Err(err) => return Err(self.fail(err, "XGROUP CREATE").await),
            }
        }
        Ok(())
    }

    #[instrument(
        skip_all,
        fields(lane = %lane, priority = ?message.priority, attempt = message.attempt),
        err
    )]
    async fn publish(&self, lane: &Lane, message: OutboundMessage) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let result: Result<String, RedisError> = redis::cmd("XADD")
            .arg(self.stream_key(lane, message.priority))
            .arg("*")
            .arg("payload")
            .arg(message.payload.as_slice())
            .arg("attempt")
            .arg(message.attempt)
            .arg("persistent")
            .arg(u8::from(message.persistent))
            .query_async(&mut conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(self.fail(err, "XADD").await),
        }
    }

    async fn fetch(&self, lane: &Lane, consumer: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.connection().await?;

        for id in ["0", ">"] {
            for priority in TIERS {
                let key = self.stream_key(lane, priority);
                if let Some(entry) = self.read_group(&mut conn, &key, consumer, id).await? {
                    if let Some(delivery) = self.to_delivery(lane, priority, entry) {
                        return Ok(Some(delivery));
                    }
                }
            }
        }

        for priority in TIERS {
            let key = self.stream_key(lane, priority);
            if let Some(entry) = self.reclaim_stale(&mut conn, &key, consumer).await? {
                if let Some(delivery) = self.to_delivery(lane, priority, entry) {
                    return Ok(Some(delivery));
                }
            }
        }

        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let (key, entry_id) = self.parse_tag(delivery)?;
        let mut conn = self.connection().await?;
        let result: Result<(), RedisError> = redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&key)
            .arg(&self.group)
            .arg(&entry_id)
            .ignore()
            .cmd("XDEL")
            .arg(&key)
            .arg(&entry_id)
            .ignore()
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err, "XACK").await),
        }
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        let (key, entry_id) = self.parse_tag(delivery)?;
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if requeue {
            let retry = delivery.to_retry();
            pipe.cmd("XADD")
                .arg(self.stream_key(delivery.lane(), retry.priority))
                .arg("*")
                .arg("payload")
                .arg(retry.payload.as_slice())
                .arg("attempt")
                .arg(retry.attempt)
                .arg("persistent")
                .arg(u8::from(retry.persistent))
                .ignore();
        }
        pipe.cmd("XACK")
            .arg(&key)
            .arg(&self.group)
            .arg(&entry_id)
            .ignore()
            .cmd("XDEL")
            .arg(&key)
            .arg(&entry_id)
            .ignore();

        let result: Result<(), RedisError> = pipe.query_async(&mut conn).await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err, "NACK").await),
        }
    }

    async fn reconnect(&self) -> Result<(), BrokerError> {
        self.connector.invalidate().await;
        match self.connector.ping().await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err, "PING").await),
        }
    }

    async fn close(&self) {
        self.connector.invalidate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_keys_split_by_priority() {
        let broker = RedisStreamsBroker::new("redis://localhost:6379").unwrap();
        let lane = Lane::durable("book_generation_queue");
        assert_eq!(
            broker.stream_key(&lane, Priority::High),
            "bookforge:lane:book_generation_queue:p1"
        );
        assert_eq!(
            broker.stream_key(&lane, Priority::Normal),
            "bookforge:lane:book_generation_queue:p0"
        );
    }

    #[test]
    fn tags_resolve_back_to_stream_and_entry() {
        let broker = RedisStreamsBroker::new("redis://localhost:6379").unwrap();
        let lane = Lane::durable("image_generation_queue");
        let delivery = Delivery::new(lane, "1|1700000000000-0", vec![], Priority::High, 1);

        let (key, entry) = broker.parse_tag(&delivery).unwrap();
        assert_eq!(key, "bookforge:lane:image_generation_queue:p1");
        assert_eq!(entry, "1700000000000-0");
    }
}
