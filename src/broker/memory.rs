//! In-process broker and publisher.
//!
//! Mirrors the contracts the AMQP transport gives the consumer: one
//! unacknowledged delivery at a time, explicit ack/reject, and connection
//! failures that can be injected to exercise the reconnect loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Broker, Delivery, ResultPublisher, Subscription};
use crate::error::BrokerError;
use crate::pipeline::types::ResultEnvelope;

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    acked: Vec<Vec<u8>>,
    rejected: Vec<Vec<u8>>,
    /// Connect attempts that will fail before one succeeds.
    failing_connects: usize,
    connect_attempts: usize,
    /// Bumped on a simulated connection drop; older subscriptions end.
    generation: u64,
    closed_subscriptions: usize,
    next_tag: u64,
}

/// A single in-memory queue.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a raw message body.
    pub fn push(&self, body: impl Into<Vec<u8>>) {
        self.lock().ready.push_back(body.into());
        self.notify.notify_waiters();
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().failing_connects = count;
    }

    /// End every live subscription as if the connection dropped.
    pub fn drop_connections(&self) {
        self.lock().generation += 1;
        self.notify.notify_waiters();
    }

    pub fn acked(&self) -> Vec<Vec<u8>> {
        self.lock().acked.clone()
    }

    pub fn rejected(&self) -> Vec<Vec<u8>> {
        self.lock().rejected.clone()
    }

    /// Messages not yet delivered.
    pub fn ready(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn closed_subscriptions(&self) -> usize {
        self.lock().closed_subscriptions
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BrokerError::Connection(format!(
                "memory broker refused connection to {queue}"
            )));
        }
        Ok(Box::new(MemorySubscription {
            broker: self.clone(),
            generation: state.generation,
            in_flight: None,
        }))
    }
}

struct MemorySubscription {
    broker: MemoryBroker,
    generation: u64,
    in_flight: Option<(u64, Vec<u8>)>,
}

impl MemorySubscription {
    fn settle(&mut self, delivery: &Delivery) -> Result<Vec<u8>, BrokerError> {
        match self.in_flight.take() {
            Some((tag, body)) if tag == delivery.tag => Ok(body),
            other => {
                self.in_flight = other;
                Err(BrokerError::Channel(format!(
                    "unknown delivery tag {}",
                    delivery.tag
                )))
            }
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        if self.in_flight.is_some() {
            return Some(Err(BrokerError::Channel(
                "prefetch limit reached: previous delivery not settled".to_string(),
            )));
        }
        loop {
            // Register interest before checking state so a push in between is not missed.
            let notified = self.broker.notify.notified();
            {
                let mut state = self.broker.lock();
                if state.generation != self.generation {
                    return None;
                }
                if let Some(body) = state.ready.pop_front() {
                    state.next_tag += 1;
                    let tag = state.next_tag;
                    self.in_flight = Some((tag, body.clone()));
                    return Some(Ok(Delivery { tag, body }));
                }
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let body = self.settle(delivery)?;
        self.broker.lock().acked.push(body);
        Ok(())
    }

    async fn reject(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let body = self.settle(delivery)?;
        self.broker.lock().rejected.push(body);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        // An unsettled delivery goes back to the queue, as on a real channel close.
        if let Some((_, body)) = self.in_flight.take() {
            state.ready.push_front(body);
        }
        state.closed_subscriptions += 1;
        Ok(())
    }
}

/// Collects published envelopes.
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<ResultEnvelope>>,
    failing: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<ResultEnvelope> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ResultPublisher for MemoryPublisher {
    async fn publish(&self, envelope: &ResultEnvelope) -> Result<(), BrokerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish {
                queue: "memory".to_string(),
                reason: "publisher unavailable".to_string(),
            });
        }
        // Round-trip through JSON so consumers see exactly what would go on the wire.
        let wire = serde_json::to_vec(envelope)?;
        let envelope: ResultEnvelope = serde_json::from_slice(&wire)?;
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_and_records_settlement() {
        let broker = MemoryBroker::new();
        broker.push("one");
        broker.push("two");

        let mut sub = broker.subscribe("q").await.unwrap();
        let first = sub.next_delivery().await.unwrap().unwrap();
        assert_eq!(first.body, b"one");
        sub.ack(&first).await.unwrap();

        let second = sub.next_delivery().await.unwrap().unwrap();
        sub.reject(&second).await.unwrap();

        assert_eq!(broker.acked(), vec![b"one".to_vec()]);
        assert_eq!(broker.rejected(), vec![b"two".to_vec()]);
    }

    #[tokio::test]
    async fn enforces_single_unacknowledged_delivery() {
        let broker = MemoryBroker::new();
        broker.push("one");
        broker.push("two");

        let mut sub = broker.subscribe("q").await.unwrap();
        let _first = sub.next_delivery().await.unwrap().unwrap();
        assert!(matches!(
            sub.next_delivery().await,
            Some(Err(BrokerError::Channel(_)))
        ));
        assert_eq!(broker.ready(), 1);
    }

    #[tokio::test]
    async fn injected_failures_then_success() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(2);
        assert!(broker.subscribe("q").await.is_err());
        assert!(broker.subscribe("q").await.is_err());
        assert!(broker.subscribe("q").await.is_ok());
        assert_eq!(broker.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn dropped_connection_ends_subscription() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscribe("q").await.unwrap();
        broker.drop_connections();
        assert!(sub.next_delivery().await.is_none());
    }

    #[tokio::test]
    async fn close_returns_unsettled_delivery() {
        let broker = MemoryBroker::new();
        broker.push("one");
        let mut sub = broker.subscribe("q").await.unwrap();
        let _delivery = sub.next_delivery().await.unwrap().unwrap();
        sub.close().await.unwrap();
        assert_eq!(broker.ready(), 1);
        assert_eq!(broker.closed_subscriptions(), 1);
    }
}
