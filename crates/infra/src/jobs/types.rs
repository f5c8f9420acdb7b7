//! Redelivery policy and per-delivery outcomes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backoff strategy between deliveries of a failing envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every requeue
    #[default]
    Fixed,
    /// base * 2^(attempt-1), capped at `max_delay`
    Exponential,
}

/// How often, and how eagerly, a failing envelope is tried again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Deliveries (including the first) before the envelope is dead-lettered.
    pub max_deliveries: u32,
    /// Pause before a failed delivery is handed back to the broker.
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(5, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn fixed(max_deliveries: u32, delay: Duration) -> Self {
        Self {
            max_deliveries: max_deliveries.max(1),
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_deliveries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_deliveries: max_deliveries.max(1),
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before requeueing delivery number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }

    /// Whether delivery number `attempt` failing should lead to another delivery.
    pub fn should_requeue(&self, attempt: u32) -> bool {
        attempt < self.max_deliveries
    }
}

/// What the worker decided to do with one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Job ran to `completed`; ack.
    Completed,
    /// Status was already `completed` (redelivery); ack without re-running.
    AlreadyCompleted,
    /// Undecodable payload; nack without requeue.
    Rejected { reason: String },
    /// Job failed; nack with requeue after `after`.
    Requeue { error: String, after: Duration },
    /// Job failed on its last allowed delivery; move to the dead-letter lane.
    DeadLetter { error: String },
}

/// Payload published to a `<lane>.dlq` lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub lane: String,
    pub reason: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
    /// The envelope as it was delivered.
    pub envelope: serde_json::Value,
}

impl DeadLetterEntry {
    pub fn new(lane: impl Into<String>, payload: &[u8], reason: String, attempts: u32) -> Self {
        let envelope = serde_json::from_slice(payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())
        });
        Self {
            lane: lane.into(),
            reason,
            attempts,
            dead_lettered_at: Utc::now(),
            envelope,
        }
    }
}
