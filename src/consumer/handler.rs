//! Per-message handling: parse → validate → classify → publish → settle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::broker::ResultPublisher;
use crate::error::MessageError;
use crate::pipeline::processor::TranscriptProcessor;
use crate::pipeline::types::{InboundMessage, ResultEnvelope};

/// What to do with a delivery once handling finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Reject without requeue.
    Reject,
}

/// Handles one delivery at a time.
pub struct MessageHandler {
    processor: Arc<TranscriptProcessor>,
    publisher: Arc<dyn ResultPublisher>,
    timeout: Duration,
    reject_on_publish_failure: bool,
}

impl MessageHandler {
    pub fn new(
        processor: Arc<TranscriptProcessor>,
        publisher: Arc<dyn ResultPublisher>,
        timeout: Duration,
    ) -> Self {
        Self {
            processor,
            publisher,
            timeout,
            reject_on_publish_failure: false,
        }
    }

    /// Reject instead of ack when the result could not be published.
    pub fn with_reject_on_publish_failure(mut self, reject: bool) -> Self {
        self.reject_on_publish_failure = reject;
        self
    }

    /// Handle a raw queue body. Every failure ends in [`Disposition::Reject`].
    pub async fn handle(&self, body: &[u8]) -> Disposition {
        match self.try_handle(body).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(error = %e, "Rejecting message");
                Disposition::Reject
            }
        }
    }

    async fn try_handle(&self, body: &[u8]) -> Result<Disposition, MessageError> {
        let message = InboundMessage::parse(body)?;
        info!(
            master_id = %message.master_id,
            text_len = message.text.len(),
            "Received message"
        );

        let master_id = message.master_id.clone();
        let envelope = self.classify(message).await?;

        // The publish outcome only decides the disposition; the envelope is not retried.
        match self.publisher.publish(&envelope).await {
            Ok(()) => Ok(Disposition::Ack),
            Err(e) if self.reject_on_publish_failure => {
                error!(master_id = %master_id, error = %e, "Publish failed, rejecting message");
                Ok(Disposition::Reject)
            }
            Err(e) => {
                warn!(
                    master_id = %master_id,
                    error = %e,
                    "Publish failed, acknowledging anyway; result is lost"
                );
                Ok(Disposition::Ack)
            }
        }
    }

    /// Run the processor on the blocking pool, bounded by the timeout.
    ///
    /// A timed-out classification keeps running in the background; its result is dropped.
    async fn classify(&self, message: InboundMessage) -> Result<ResultEnvelope, MessageError> {
        let processor = Arc::clone(&self.processor);
        let master_id = message.master_id.clone();
        let task = tokio::task::spawn_blocking(move || processor.analyze(&message));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(join_error)) => Err(MessageError::Worker(join_error.to_string())),
            Err(_) => {
                error!(master_id = %master_id, timeout = ?self.timeout, "Text processing timed out");
                Err(MessageError::Timeout(self.timeout))
            }
        }
    }
}
