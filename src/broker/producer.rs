//! Batching publisher.
//!
//! Callers hand messages to a background task which groups them into one
//! broker write per `batch_size` messages or `batch_timeout`, whichever comes
//! first. Each caller waits for the outcome of the write that carried its
//! message; there is no retry here.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fanfeed_api_types::Event;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error};

use super::{BrokerError, MessageWriter, OutboundMessage};

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub topic: String,
    pub batch_size: usize,
    pub batch_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            topic: "post-events".to_string(),
            batch_size: 100,
            batch_timeout: Duration::from_millis(10),
        }
    }
}

struct Pending {
    message: OutboundMessage,
    ack: oneshot::Sender<Result<(), BrokerError>>,
}

#[derive(Clone)]
pub struct Producer {
    topic: Arc<str>,
    queue: mpsc::Sender<Pending>,
}

impl Producer {
    /// Start the batching task on the current runtime. It ends once every
    /// clone of the returned producer is dropped and the queue drains.
    pub fn spawn(writer: Arc<dyn MessageWriter>, config: ProducerConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        let (queue, receiver) = mpsc::channel(batch_size * 4);
        let topic: Arc<str> = Arc::from(config.topic);

        tokio::spawn(run_batcher(
            writer,
            Arc::clone(&topic),
            receiver,
            batch_size,
            config.batch_timeout,
        ));

        Self { topic, queue }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one keyed message and wait until the broker accepted it.
    pub async fn publish(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<(), BrokerError> {
        self.publish_message(OutboundMessage::new(key, value)).await
    }

    pub async fn publish_message(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let (ack, outcome) = oneshot::channel();
        self.queue
            .send(Pending { message, ack })
            .await
            .map_err(|_| BrokerError::Closed)?;
        outcome.await.map_err(|_| BrokerError::Closed)?
    }

    /// Publish `event` as JSON keyed by its actor, so one author's events stay
    /// ordered on a single partition.
    pub async fn publish_event(&self, event: &Event) -> Result<(), BrokerError> {
        let value = event
            .to_bytes()
            .map_err(|err| BrokerError::Encode(err.to_string()))?;
        self.publish(Bytes::from(event.actor_id.clone()), value)
            .await
    }
}

async fn run_batcher(
    writer: Arc<dyn MessageWriter>,
    topic: Arc<str>,
    mut receiver: mpsc::Receiver<Pending>,
    batch_size: usize,
    batch_timeout: Duration,
) {
    while let Some(first) = receiver.recv().await {
        let deadline = Instant::now() + batch_timeout;
        let mut batch = vec![first];

        while batch.len() < batch_size {
            match tokio::time::timeout_at(deadline, receiver.recv()).await {
                Ok(Some(pending)) => batch.push(pending),
                Ok(None) | Err(_) => break,
            }
        }

        flush(writer.as_ref(), &topic, batch).await;
    }
    debug!(
        target = "fanfeed::broker::producer",
        topic = %topic,
        "producer queue closed"
    );
}

async fn flush(writer: &dyn MessageWriter, topic: &str, batch: Vec<Pending>) {
    let size = batch.len();
    let (messages, acks): (Vec<_>, Vec<_>) = batch
        .into_iter()
        .map(|pending| (pending.message, pending.ack))
        .unzip();

    let outcome = writer.write(topic, messages).await;
    if let Err(err) = &outcome {
        error!(
            target = "fanfeed::broker::producer",
            topic = %topic,
            batch_size = size,
            error = %err,
            "batch write failed"
        );
    }
    for ack in acks {
        let _ = ack.send(outcome.clone());
    }
}
