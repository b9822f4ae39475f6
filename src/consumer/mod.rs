//! Queue consumer: keeps a subscription alive and feeds the handler.
//!
//! States: `Disconnected` → `Consuming` → `ShuttingDown`. Any transport error
//! drops back to `Disconnected`, waits the fixed reconnect delay and tries
//! again, indefinitely. Only the shutdown signal ends the loop, and it is
//! observed between messages, never in the middle of one.

pub mod handler;

pub use handler::{Disposition, MessageHandler};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::broker::{Broker, Delivery, Subscription};
use crate::error::BrokerError;

/// Where the consumer currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Disconnected,
    Consuming,
    ShuttingDown,
}

/// Why a consuming session ended.
enum SessionEnd {
    Shutdown,
    Lost(BrokerError),
}

pub struct Consumer {
    broker: Arc<dyn Broker>,
    handler: Arc<MessageHandler>,
    queue: String,
    reconnect_delay: Duration,
    state: watch::Sender<ConsumerState>,
}

impl Consumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        handler: Arc<MessageHandler>,
        queue: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            broker,
            handler,
            queue: queue.into(),
            reconnect_delay,
            state,
        }
    }

    /// Subscribe to lifecycle changes.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue, "Consumer starting");

        loop {
            if is_shutdown(&shutdown) {
                break;
            }
            self.set_state(ConsumerState::Disconnected);

            let mut subscription = match self.broker.subscribe(&self.queue).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(
                        error = %e,
                        "RabbitMQ connection error, reconnecting in {}s",
                        self.reconnect_delay.as_secs_f32()
                    );
                    if self.backoff(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            info!(queue = %self.queue, "Connected, consuming");
            self.set_state(ConsumerState::Consuming);

            match self.consume(subscription.as_mut(), &mut shutdown).await {
                SessionEnd::Shutdown => {
                    self.set_state(ConsumerState::ShuttingDown);
                    info!("Shutdown requested, cancelling consumer");
                    if let Err(e) = subscription.close().await {
                        warn!(error = %e, "Failed to close subscription cleanly");
                    }
                    break;
                }
                SessionEnd::Lost(e) => {
                    error!(
                        error = %e,
                        "RabbitMQ connection lost, reconnecting in {}s",
                        self.reconnect_delay.as_secs_f32()
                    );
                    if let Err(e) = subscription.close().await {
                        warn!(error = %e, "Failed to close broken subscription");
                    }
                    if self.backoff(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConsumerState::ShuttingDown);
        info!("Consumer stopped");
    }

    /// Consume deliveries one at a time until shutdown or a transport error.
    async fn consume(
        &self,
        subscription: &mut dyn Subscription,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return SessionEnd::Shutdown,
                next = subscription.next_delivery() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return SessionEnd::Lost(e),
                None => {
                    return SessionEnd::Lost(BrokerError::Connection(
                        "consumer stream ended".to_string(),
                    ));
                }
            };

            if let Err(e) = self.dispatch(subscription, delivery).await {
                return SessionEnd::Lost(e);
            }
        }
    }

    async fn dispatch(
        &self,
        subscription: &mut dyn Subscription,
        delivery: Delivery,
    ) -> Result<(), BrokerError> {
        match self.handler.handle(&delivery.body).await {
            Disposition::Ack => subscription.ack(&delivery).await,
            Disposition::Reject => subscription.reject(&delivery).await,
        }
    }

    /// Sleep the reconnect delay. Returns true if shutdown was requested meanwhile.
    async fn backoff(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = wait_for_shutdown(shutdown) => true,
            _ = tokio::time::sleep(self.reconnect_delay) => false,
        }
    }
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        // A dropped sender counts as shutdown.
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
