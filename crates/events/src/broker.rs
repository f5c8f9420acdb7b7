//! Broker abstraction (mechanics only).
//!
//! A broker moves opaque payloads through named durable [`Lane`]s with
//! **at-least-once** delivery:
//!
//! - a [`Delivery`] stays owned by the consumer until it is acknowledged
//!   ([`Broker::ack`]) or negatively acknowledged ([`Broker::nack`]);
//! - a delivery that is never settled (consumer crash, connection loss) is
//!   handed out again;
//! - consumers must therefore be idempotent.
//!
//! Within a lane deliveries are FIFO modulo priority: [`Priority::High`]
//! messages may overtake [`Priority::Normal`] ones. There is no ordering across
//! lanes.
//!
//! ## Prefetch
//!
//! [`Broker::fetch`] returns at most one message per call and a consumer is
//! expected to settle it before fetching again from the same lane. Brokers may
//! enforce this (the in-memory broker does).

use async_trait::async_trait;
use bookforge_core::Priority;
use thiserror::Error;

use crate::lane::Lane;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker cannot be reached (connection refused, dropped, timed out).
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("lane not declared: {0}")]
    UnknownLane(String),

    /// The delivery was already settled, or belongs to a dead connection.
    #[error("unknown delivery: {0}")]
    UnknownDelivery(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("broker command failed: {0}")]
    Command(String),
}

impl BrokerError {
    /// Whether the failure means "reconnect and try again".
    pub fn is_connection(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

/// A message on its way into a lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub priority: Priority,
    /// Survives a broker restart.
    pub persistent: bool,
    /// 1 for a fresh publish; carried forward on requeue.
    pub attempt: u32,
}

impl OutboundMessage {
    pub fn persistent(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            priority: Priority::Normal,
            persistent: true,
            attempt: 1,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }
}

/// A message handed to a consumer, owned by it until settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    lane: Lane,
    tag: String,
    payload: Vec<u8>,
    priority: Priority,
    attempt: u32,
}

impl Delivery {
    pub fn new(
        lane: Lane,
        tag: impl Into<String>,
        payload: Vec<u8>,
        priority: Priority,
        attempt: u32,
    ) -> Self {
        Self {
            lane,
            tag: tag.into(),
            payload,
            priority,
            attempt: attempt.max(1),
        }
    }

    pub fn lane(&self) -> &Lane {
        &self.lane
    }

    /// Broker-specific handle used to settle this delivery.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// 1-based count of how many times this envelope has been handed out.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The message to publish if this delivery is tried again.
    pub fn to_retry(&self) -> OutboundMessage {
        OutboundMessage::persistent(self.payload.clone())
            .with_priority(self.priority)
            .with_attempt(self.attempt + 1)
    }
}

/// Transport-agnostic durable work queue.
///
/// Implementations are shared behind `Arc<dyn Broker>` by the producer and
/// every worker, so they must be `Send + Sync` and keep their
/// connection state internal.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a lane. Idempotent; redeclaring with the same properties is a no-op.
    async fn declare_lane(&self, lane: &Lane) -> Result<(), BrokerError>;

    async fn publish(&self, lane: &Lane, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Take the next message from `lane` for `consumer`, if one is ready.
    ///
    /// Never blocks waiting for a message; callers poll.
    async fn fetch(&self, lane: &Lane, consumer: &str) -> Result<Option<Delivery>, BrokerError>;

    /// Remove the delivery from the lane permanently.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Give the delivery back. With `requeue` it is delivered again (with its
    /// attempt counter advanced); without, it is dropped.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError>;

    /// Re-establish the underlying connection after [`BrokerError::Unavailable`].
    async fn reconnect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    /// Release connections. Called once on shutdown.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_message_advances_attempt() {
        let delivery = Delivery::new(
            Lane::durable("q"),
            "t-1",
            b"payload".to_vec(),
            Priority::High,
            2,
        );
        let retry = delivery.to_retry();
        assert_eq!(retry.attempt, 3);
        assert_eq!(retry.priority, Priority::High);
        assert!(retry.persistent);
    }

    #[test]
    fn only_unavailable_is_a_connection_error() {
        assert!(BrokerError::Unavailable("down".into()).is_connection());
        assert!(!BrokerError::Command("bad".into()).is_connection());
    }
}
