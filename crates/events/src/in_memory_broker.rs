//! In-memory broker for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bookforge_core::Priority;

use crate::broker::{Broker, BrokerError, Delivery, OutboundMessage};
use crate::lane::Lane;

#[derive(Debug, Clone)]
struct Queued {
    payload: Vec<u8>,
    priority: Priority,
    attempt: u32,
}

#[derive(Debug)]
struct InFlight {
    consumer: String,
    message: Queued,
}

#[derive(Debug, Default)]
struct LaneState {
    high: VecDeque<Queued>,
    normal: VecDeque<Queued>,
    in_flight: HashMap<String, InFlight>,
}

impl LaneState {
    fn push_back(&mut self, message: Queued) {
        match message.priority {
            Priority::High => self.high.push_back(message),
            Priority::Normal => self.normal.push_back(message),
        }
    }

    fn push_front(&mut self, message: Queued) {
        match message.priority {
            Priority::High => self.high.push_front(message),
            Priority::Normal => self.normal.push_front(message),
        }
    }

    fn pop(&mut self) -> Option<Queued> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }
}

/// Broker kept entirely in process memory.
///
/// - Lanes must be declared before use
/// - High priority drains before normal; FIFO within a tier
/// - Prefetch 1: a consumer holding an unsettled delivery on a lane gets
///   nothing more from that lane
/// - [`InMemoryBroker::set_available`] simulates an outage: while down every
///   call fails with [`BrokerError::Unavailable`], and going down returns all
///   unsettled deliveries to their lanes (as a dropped connection would)
#[derive(Debug)]
pub struct InMemoryBroker {
    lanes: Mutex<HashMap<String, LaneState>>,
    available: AtomicBool,
    next_tag: AtomicU64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was && !available {
            if let Ok(mut lanes) = self.lanes.lock() {
                for state in lanes.values_mut() {
                    let orphaned: Vec<_> = state.in_flight.drain().map(|(_, f)| f).collect();
                    for flight in orphaned.into_iter().rev() {
                        let mut message = flight.message;
                        message.attempt += 1;
                        state.push_front(message);
                    }
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Messages ready for delivery on `lane`.
    pub fn depth(&self, lane: &Lane) -> usize {
        self.lanes
            .lock()
            .ok()
            .and_then(|lanes| {
                lanes
                    .get(lane.name())
                    .map(|state| state.high.len() + state.normal.len())
            })
            .unwrap_or(0)
    }

    /// Deliveries handed out on `lane` and not yet settled.
    pub fn in_flight(&self, lane: &Lane) -> usize {
        self.lanes
            .lock()
            .ok()
            .and_then(|lanes| lanes.get(lane.name()).map(|state| state.in_flight.len()))
            .unwrap_or(0)
    }

    pub fn is_declared(&self, lane: &Lane) -> bool {
        self.lanes
            .lock()
            .map(|lanes| lanes.contains_key(lane.name()))
            .unwrap_or(false)
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<String, LaneState>>, BrokerError> {
        if !self.is_available() {
            return Err(BrokerError::Unavailable("in-memory broker is down".into()));
        }
        self.lanes
            .lock()
            .map_err(|_| BrokerError::Command("lock poisoned".into()))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            next_tag: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_lane(&self, lane: &Lane) -> Result<(), BrokerError> {
        self.guard()?.entry(lane.name().to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, lane: &Lane, message: OutboundMessage) -> Result<(), BrokerError> {
        let mut lanes = self.guard()?;
        let state = lanes
            .get_mut(lane.name())
            .ok_or_else(|| BrokerError::UnknownLane(lane.name().to_string()))?;
        state.push_back(Queued {
            payload: message.payload,
            priority: message.priority,
            attempt: message.attempt.max(1),
        });
        Ok(())
    }

    async fn fetch(&self, lane: &Lane, consumer: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut lanes = self.guard()?;
        let state = lanes
            .get_mut(lane.name())
            .ok_or_else(|| BrokerError::UnknownLane(lane.name().to_string()))?;

        if state.in_flight.values().any(|f| f.consumer == consumer) {
            return Ok(None);
        }

        let Some(message) = state.pop() else {
            return Ok(None);
        };

        let tag = format!("{}-{}", lane.name(), self.next_tag.fetch_add(1, Ordering::SeqCst));
        let delivery = Delivery::new(
            lane.clone(),
            tag.clone(),
            message.payload.clone(),
            message.priority,
            message.attempt,
        );
        state.in_flight.insert(
            tag,
            InFlight {
                consumer: consumer.to_string(),
                message,
            },
        );
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut lanes = self.guard()?;
        lanes
            .get_mut(delivery.lane().name())
            .and_then(|state| state.in_flight.remove(delivery.tag()))
            .map(|_| ())
            .ok_or_else(|| BrokerError::UnknownDelivery(delivery.tag().to_string()))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        let mut lanes = self.guard()?;
        let state = lanes
            .get_mut(delivery.lane().name())
            .ok_or_else(|| BrokerError::UnknownLane(delivery.lane().name().to_string()))?;
        let flight = state
            .in_flight
            .remove(delivery.tag())
            .ok_or_else(|| BrokerError::UnknownDelivery(delivery.tag().to_string()))?;

        if requeue {
            let mut message = flight.message;
            message.attempt += 1;
            state.push_front(message);
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BrokerError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("in-memory broker is down".into()))
        }
    }
}
