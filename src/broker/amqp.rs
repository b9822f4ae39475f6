//! RabbitMQ transport via lapin.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Broker, Delivery, PERSISTENT_DELIVERY_MODE, ResultPublisher, Subscription};
use crate::error::BrokerError;
use crate::pipeline::types::ResultEnvelope;

/// AMQP reply code for a normal connection close.
const REPLY_SUCCESS: u16 = 200;

/// Run lapin's I/O and callbacks on the current tokio runtime.
fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

async fn connect(url: &SecretString) -> Result<Connection, BrokerError> {
    Connection::connect(url.expose_secret(), connection_properties())
        .await
        .map_err(|e| BrokerError::Connection(e.to_string()))
}

async fn close_connection(connection: &Connection) -> Result<(), BrokerError> {
    if connection.status().connected() {
        connection.close(REPLY_SUCCESS, "OK").await?;
        info!("RabbitMQ connection closed");
    }
    Ok(())
}

/// Consumes the input queue over a single long-lived connection.
pub struct AmqpBroker {
    url: SecretString,
}

impl AmqpBroker {
    pub fn new(url: SecretString) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let connection = connect(&self.url).await?;
        let channel = connection.create_channel().await?;
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let consumer_tag = format!("verba-metrics-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(queue, consumer_tag = %consumer_tag, "Consumer registered");

        Ok(Box::new(AmqpSubscription {
            connection,
            channel,
            consumer,
            consumer_tag,
        }))
    }
}

struct AmqpSubscription {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    consumer_tag: String,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let next = self.consumer.next().await?;
        Some(
            next.map(|d| Delivery {
                tag: d.delivery_tag,
                body: d.data,
            })
            .map_err(BrokerError::from),
        )
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery.tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn reject(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(delivery.tag, BasicRejectOptions { requeue: false })
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.channel.status().connected() {
            self.channel
                .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
                .await?;
            debug!(consumer_tag = %self.consumer_tag, "Consumer cancelled");
        }
        close_connection(&self.connection).await
    }
}

/// Publishes envelopes, opening a fresh connection for every message.
pub struct AmqpPublisher {
    url: SecretString,
    queue: String,
}

impl AmqpPublisher {
    pub fn new(url: SecretString, queue: String) -> Self {
        Self { url, queue }
    }

    async fn send(&self, connection: &Connection, payload: &[u8]) -> Result<(), BrokerError> {
        let channel = connection.create_channel().await?;
        // The output queue is owned by its consumer; only check that it exists.
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY_MODE),
            )
            .await?
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResultPublisher for AmqpPublisher {
    async fn publish(&self, envelope: &ResultEnvelope) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(envelope)?;
        let connection = connect(&self.url).await?;

        let sent = self.send(&connection, &payload).await;
        let closed = close_connection(&connection).await;

        sent.map_err(|e| BrokerError::Publish {
            queue: self.queue.clone(),
            reason: e.to_string(),
        })?;
        closed?;
        info!(queue = %self.queue, master_id = %envelope.master_id, "Result published");
        Ok(())
    }
}
