//! Durable lanes and the broker contract the pipeline runs on.

pub mod broker;
pub mod in_memory_broker;
pub mod lane;

pub use broker::{Broker, BrokerError, Delivery, OutboundMessage};
pub use in_memory_broker::InMemoryBroker;
pub use lane::Lane;
