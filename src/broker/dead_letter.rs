//! Dead-letter envelopes and the operator tools that read them back.

use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use super::{BrokerError, Message, MessageReader, MessageWriter, OutboundMessage};

pub const HEADER_ORIGINAL_TOPIC: &str = "original-topic";
pub const HEADER_ERROR: &str = "error";
pub const HEADER_FAILED_AT: &str = "failed-at";

/// Copy of `message` for the dead-letter topic: same key, value and headers,
/// plus the source topic, the last error and the failure time.
pub fn dead_letter_message(
    message: &Message,
    error: &str,
    failed_at: OffsetDateTime,
) -> OutboundMessage {
    let failed_at = failed_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| failed_at.unix_timestamp().to_string());

    let mut envelope = OutboundMessage::new(message.key.clone(), message.value.clone());
    envelope.headers = message.headers.clone();
    envelope
        .with_header(HEADER_ORIGINAL_TOPIC, message.topic.clone())
        .with_header(HEADER_ERROR, error.to_string())
        .with_header(HEADER_FAILED_AT, failed_at)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("dead-letter message at {partition}/{offset} has no `original-topic` header")]
    MissingOriginalTopic { partition: u32, offset: i64 },
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Target topic and cleaned message for re-publishing a dead letter. The
/// dead-letter headers are dropped; any other headers are kept.
pub fn replay_target(message: &Message) -> Result<(String, OutboundMessage), ReplayError> {
    let topic = message
        .header_str(HEADER_ORIGINAL_TOPIC)
        .filter(|topic| !topic.is_empty())
        .ok_or(ReplayError::MissingOriginalTopic {
            partition: message.partition,
            offset: message.offset,
        })?
        .to_string();

    let mut outbound = OutboundMessage::new(message.key.clone(), message.value.clone());
    outbound.headers = message
        .headers
        .iter()
        .filter(|header| {
            !matches!(
                header.key.as_str(),
                HEADER_ORIGINAL_TOPIC | HEADER_ERROR | HEADER_FAILED_AT
            )
        })
        .cloned()
        .collect();
    Ok((topic, outbound))
}

/// Read up to `limit` dead letters, stopping early after `idle` without one.
pub async fn inspect(
    reader: &dyn MessageReader,
    limit: usize,
    idle: Duration,
) -> Result<Vec<Message>, BrokerError> {
    let mut messages = Vec::new();
    while messages.len() < limit {
        match tokio::time::timeout(idle, reader.fetch()).await {
            Ok(fetched) => messages.push(fetched?),
            Err(_) => {
                info!(
                    target = "fanfeed::broker::dead_letter",
                    topic = %reader.topic(),
                    read = messages.len(),
                    "no more dead letters"
                );
                break;
            }
        }
    }
    Ok(messages)
}

/// Dead letter a replay run could not re-publish. Nothing at or after it in
/// its partition has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStop {
    pub partition: u32,
    pub offset: i64,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub stopped: Option<ReplayStop>,
}

/// Re-publish up to `limit` dead letters to their original topics, committing
/// each one after its replay succeeded. The run stops at the first message it
/// cannot replay, so a later run with the same group starts from it again.
pub async fn replay(
    reader: &dyn MessageReader,
    writer: &dyn MessageWriter,
    limit: usize,
    idle: Duration,
) -> Result<ReplaySummary, BrokerError> {
    let mut summary = ReplaySummary::default();

    while summary.replayed < limit {
        let message = match tokio::time::timeout(idle, reader.fetch()).await {
            Ok(fetched) => fetched?,
            Err(_) => break,
        };

        let reason = match replay_target(&message) {
            Ok((topic, outbound)) => match writer.write(&topic, vec![outbound]).await {
                Ok(()) => {
                    reader.commit(&message).await?;
                    info!(
                        target = "fanfeed::broker::dead_letter",
                        original_topic = %topic,
                        key = %String::from_utf8_lossy(&message.key),
                        "replayed dead letter"
                    );
                    summary.replayed += 1;
                    continue;
                }
                Err(err) => format!("publish to `{topic}` failed: {err}"),
            },
            Err(err) => err.to_string(),
        };

        warn!(
            target = "fanfeed::broker::dead_letter",
            partition = message.partition,
            offset = message.offset,
            reason = %reason,
            "stopping replay at dead letter"
        );
        summary.stopped = Some(ReplayStop {
            partition: message.partition,
            offset: message.offset,
            reason,
        });
        break;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use time::macros::datetime;

    use super::*;
    use crate::broker::Header;
    use crate::broker::memory::MemoryBroker;

    fn failed_message() -> Message {
        Message {
            topic: "post-events".into(),
            partition: 2,
            offset: 41,
            key: Bytes::from_static(b"alice"),
            value: Bytes::from_static(b"{\"event_id\":1}"),
            headers: vec![Header::new("trace", "abc")],
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn envelope_keeps_payload_and_adds_failure_headers() {
        let message = failed_message();
        let envelope = dead_letter_message(&message, "boom", datetime!(2026-01-02 03:04:05 UTC));

        assert_eq!(envelope.key, message.key);
        assert_eq!(envelope.value, message.value);
        let keys: Vec<&str> = envelope.headers.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["trace", "original-topic", "error", "failed-at"]);
        assert_eq!(envelope.headers[1].value, "post-events");
        assert_eq!(envelope.headers[2].value, "boom");
        assert_eq!(envelope.headers[3].value, "2026-01-02T03:04:05Z");
    }

    #[test]
    fn replay_target_strips_failure_headers() {
        let message = failed_message();
        let envelope = dead_letter_message(&message, "boom", OffsetDateTime::UNIX_EPOCH);
        let dead_letter = Message {
            topic: "dead-letter-events".into(),
            headers: envelope.headers,
            ..message.clone()
        };

        let (topic, outbound) = replay_target(&dead_letter).expect("target");
        assert_eq!(topic, "post-events");
        assert_eq!(outbound.headers, vec![Header::new("trace", "abc")]);
        assert_eq!(outbound.value, message.value);
    }

    #[test]
    fn replay_target_requires_original_topic() {
        assert_eq!(
            replay_target(&failed_message()).expect_err("missing header"),
            ReplayError::MissingOriginalTopic {
                partition: 2,
                offset: 41
            }
        );
    }

    struct FailFirstWrite {
        inner: MemoryBroker,
        failed: AtomicBool,
    }

    #[async_trait]
    impl MessageWriter for FailFirstWrite {
        async fn write(
            &self,
            topic: &str,
            messages: Vec<OutboundMessage>,
        ) -> Result<(), BrokerError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(BrokerError::Unavailable("broker offline".into()));
            }
            self.inner.write(topic, messages).await
        }
    }

    async fn seed_dead_letters(broker: &MemoryBroker, keys: &[&str]) {
        let envelopes = keys
            .iter()
            .map(|key| {
                let message = Message {
                    key: Bytes::copy_from_slice(key.as_bytes()),
                    ..failed_message()
                };
                dead_letter_message(&message, "boom", OffsetDateTime::UNIX_EPOCH)
            })
            .collect();
        broker
            .write("dead-letter-events", envelopes)
            .await
            .expect("seed");
    }

    #[tokio::test]
    async fn replay_republishes_and_commits() {
        let broker = MemoryBroker::new(1);
        seed_dead_letters(&broker, &["alice", "bob"]).await;

        let reader = broker.reader("dead-letter-events", "replayer", 0, 1);
        let summary = replay(&reader, &broker, 10, Duration::from_millis(50))
            .await
            .expect("replay");

        assert_eq!(summary.replayed, 2);
        assert_eq!(summary.stopped, None);
        let replayed = broker.messages("post-events");
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].key, "alice");
        assert_eq!(
            broker.committed_offset("replayer", "dead-letter-events", 0),
            Some(2)
        );
    }

    #[tokio::test]
    async fn failed_replay_is_retried_by_the_next_run() {
        let broker = MemoryBroker::new(1);
        seed_dead_letters(&broker, &["alice", "bob"]).await;
        let writer = FailFirstWrite {
            inner: broker.clone(),
            failed: AtomicBool::new(false),
        };

        let reader = broker.reader("dead-letter-events", "replayer", 0, 1);
        let first = replay(&reader, &writer, 10, Duration::from_millis(50))
            .await
            .expect("replay");
        assert_eq!(first.replayed, 0);
        let stop = first.stopped.expect("run stops at the failure");
        assert_eq!((stop.partition, stop.offset), (0, 0));
        assert!(broker.messages("post-events").is_empty());
        assert_eq!(
            broker.committed_offset("replayer", "dead-letter-events", 0),
            None
        );

        let reader = broker.reader("dead-letter-events", "replayer", 0, 1);
        let second = replay(&reader, &writer, 10, Duration::from_millis(50))
            .await
            .expect("replay");
        assert_eq!(second.replayed, 2);
        assert_eq!(second.stopped, None);
        let keys: Vec<_> = broker
            .messages("post-events")
            .into_iter()
            .map(|message| message.key)
            .collect();
        assert_eq!(keys, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn replay_stops_before_message_without_origin() {
        let broker = MemoryBroker::new(1);
        seed_dead_letters(&broker, &["alice"]).await;
        broker
            .write(
                "dead-letter-events",
                vec![OutboundMessage::new("bob", "no headers")],
            )
            .await
            .expect("seed");
        seed_dead_letters(&broker, &["carol"]).await;

        let reader = broker.reader("dead-letter-events", "replayer", 0, 1);
        let summary = replay(&reader, &broker, 10, Duration::from_millis(50))
            .await
            .expect("replay");

        assert_eq!(summary.replayed, 1);
        assert_eq!(summary.stopped.map(|stop| stop.offset), Some(1));
        assert_eq!(broker.messages("post-events").len(), 1);
        assert_eq!(
            broker.committed_offset("replayer", "dead-letter-events", 0),
            Some(1)
        );
    }

    #[tokio::test]
    async fn inspect_stops_when_idle() {
        let broker = MemoryBroker::new(1);
        broker
            .write("dead-letter-events", vec![OutboundMessage::new("k", "v")])
            .await
            .expect("seed");

        let reader = broker.reader("dead-letter-events", "inspector", 0, 1);
        let messages = inspect(&reader, 10, Duration::from_millis(50))
            .await
            .expect("inspect");
        assert_eq!(messages.len(), 1);
    }
}
