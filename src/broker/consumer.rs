//! Consumer loop: fetch, handle with retries, dead-letter, commit.
//!
//! One loop processes one message at a time. A message is always committed
//! once handling ends, whether it succeeded, was dead-lettered, or could not
//! even be dead-lettered. The last case loses the message; a poison message
//! never stalls its partition.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::metrics::{NoopMetrics, PipelineMetrics, ProcessStatus};

use super::dead_letter::dead_letter_message;
use super::{Message, MessageReader, MessageWriter};

/// Failure of one handler attempt. Every variant is retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("failed to decode event: {0}")]
    Decode(String),
    #[error("invalid event: {0}")]
    Invalid(String),
    #[error("store failure during {stage}: {message}")]
    Store {
        stage: &'static str,
        message: String,
    },
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn store(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Store {
            stage,
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;

    /// Label used for metrics; handlers may classify by payload.
    fn label(&self, _message: &Message) -> &'static str {
        "message"
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub max_retries: u32,
    /// Unit of the `attempt² × unit` pause between handler attempts.
    pub retry_backoff: Duration,
    pub fetch_backoff_initial: Duration,
    pub fetch_backoff_max: Duration,
    /// `None` disables dead-lettering.
    pub dead_letter_topic: Option<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            fetch_backoff_initial: Duration::from_millis(100),
            fetch_backoff_max: Duration::from_secs(30),
            dead_letter_topic: Some("dead-letter-events".to_string()),
        }
    }
}

/// How processing of one message ended. `committed` reports whether the
/// offset commit that follows every outcome succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Handled {
        attempts: u32,
        committed: bool,
    },
    DeadLettered {
        attempts: u32,
        error: HandlerError,
        committed: bool,
    },
    /// Retries exhausted and the dead-letter publish failed or is disabled.
    Dropped {
        attempts: u32,
        error: HandlerError,
        committed: bool,
    },
}

impl Delivery {
    pub fn committed(&self) -> bool {
        match self {
            Self::Handled { committed, .. }
            | Self::DeadLettered { committed, .. }
            | Self::Dropped { committed, .. } => *committed,
        }
    }
}

pub struct ConsumerLoop {
    name: String,
    reader: Arc<dyn MessageReader>,
    dead_letters: Arc<dyn MessageWriter>,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<dyn PipelineMetrics>,
    config: ConsumerConfig,
}

impl ConsumerLoop {
    pub fn new(
        name: impl Into<String>,
        reader: Arc<dyn MessageReader>,
        dead_letters: Arc<dyn MessageWriter>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            reader,
            dead_letters,
            handler,
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run until `cancel` fires. Cancellation is observed while fetching and
    /// during fetch backoff; a message already being processed runs to its
    /// commit first.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            target = "fanfeed::broker::consumer",
            consumer = %self.name,
            topic = %self.reader.topic(),
            "consumer loop started"
        );
        let mut backoff = self.config.fetch_backoff_initial;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.reader.fetch() => fetched,
            };

            let message = match fetched {
                Ok(message) => {
                    backoff = self.config.fetch_backoff_initial;
                    message
                }
                Err(err) => {
                    warn!(
                        target = "fanfeed::broker::consumer",
                        consumer = %self.name,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "fetch failed; backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = next_fetch_backoff(backoff, self.config.fetch_backoff_max);
                    continue;
                }
            };

            self.process(&message).await;
        }

        info!(
            target = "fanfeed::broker::consumer",
            consumer = %self.name,
            "consumer loop stopped"
        );
    }

    /// Handle one fetched message through retry, dead-letter and commit.
    pub async fn process(&self, message: &Message) -> Delivery {
        let started = Instant::now();
        let label = self.handler.label(message);
        let max_retries = self.config.max_retries.max(1);
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 1..=max_retries {
            attempts = attempt;
            match self.attempt(message).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(err) => {
                    warn!(
                        target = "fanfeed::broker::consumer",
                        consumer = %self.name,
                        partition = message.partition,
                        offset = message.offset,
                        attempt,
                        max_retries,
                        error = %err,
                        "handler attempt failed"
                    );
                    last_error = Some(err);
                    if attempt < max_retries {
                        tokio::time::sleep(self.config.retry_backoff * attempt * attempt).await;
                    }
                }
            }
        }

        let dead_lettered = match &last_error {
            Some(error) => self.dead_letter(message, error).await,
            None => false,
        };
        let status = match (&last_error, dead_lettered) {
            (None, _) => ProcessStatus::Success,
            (Some(_), true) => ProcessStatus::DeadLettered,
            (Some(_), false) => ProcessStatus::Failed,
        };
        self.metrics.event_processed(label, status, started.elapsed());

        let committed = self.commit(message).await;
        match last_error {
            None => Delivery::Handled {
                attempts,
                committed,
            },
            Some(error) if dead_lettered => Delivery::DeadLettered {
                attempts,
                error,
                committed,
            },
            Some(error) => Delivery::Dropped {
                attempts,
                error,
                committed,
            },
        }
    }

    async fn attempt(&self, message: &Message) -> Result<(), HandlerError> {
        match AssertUnwindSafe(self.handler.handle(message))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// Returns whether the message reached the dead-letter topic.
    async fn dead_letter(&self, message: &Message, error: &HandlerError) -> bool {
        let Some(topic) = self.config.dead_letter_topic.as_deref() else {
            error!(
                target = "fanfeed::broker::consumer",
                consumer = %self.name,
                partition = message.partition,
                offset = message.offset,
                error = %error,
                "retries exhausted and dead-lettering is disabled; dropping message"
            );
            return false;
        };

        let envelope = dead_letter_message(message, &error.to_string(), OffsetDateTime::now_utc());
        match self.dead_letters.write(topic, vec![envelope]).await {
            Ok(()) => {
                self.metrics.dead_lettered(topic);
                warn!(
                    target = "fanfeed::broker::consumer",
                    consumer = %self.name,
                    dead_letter_topic = topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %error,
                    "message sent to dead-letter topic"
                );
                true
            }
            Err(publish_err) => {
                error!(
                    target = "fanfeed::broker::consumer",
                    consumer = %self.name,
                    dead_letter_topic = topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %error,
                    publish_error = %publish_err,
                    "dead-letter publish failed; message is lost"
                );
                false
            }
        }
    }

    async fn commit(&self, message: &Message) -> bool {
        match self.reader.commit(message).await {
            Ok(()) => {
                debug!(
                    target = "fanfeed::broker::consumer",
                    consumer = %self.name,
                    partition = message.partition,
                    offset = message.offset,
                    "offset committed"
                );
                true
            }
            Err(err) => {
                error!(
                    target = "fanfeed::broker::consumer",
                    consumer = %self.name,
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "offset commit failed"
                );
                false
            }
        }
    }
}

fn next_fetch_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
