//! Message-broker boundary.
//!
//! The consumer loop and the handler only see these traits. `amqp` talks to
//! RabbitMQ through lapin; `memory` is an in-process broker for local runs
//! and tests.

pub mod amqp;
pub mod memory;

pub use amqp::{AmqpBroker, AmqpPublisher};
pub use memory::{MemoryBroker, MemoryPublisher};

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::pipeline::types::ResultEnvelope;

/// AMQP `delivery_mode` for messages that survive a broker restart.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// One message taken off the input queue, awaiting ack or reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
}

/// Connects to the broker and starts consuming.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connect, open a channel, limit unacknowledged deliveries to one,
    /// declare the durable `queue` and register a consumer on it.
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// A live consumer registration.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` means the consumer stream ended.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Reject without requeueing.
    async fn reject(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Cancel the consumer and close the connection.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Sends result envelopes to the output queue.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, envelope: &ResultEnvelope) -> Result<(), BrokerError>;
}
