use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fanfeed::broker::dead_letter::{HEADER_ERROR, HEADER_FAILED_AT, HEADER_ORIGINAL_TOPIC};
use fanfeed::broker::memory::MemoryBroker;
use fanfeed::broker::{
    BrokerError, ConsumerConfig, ConsumerLoop, Delivery, HandlerError, Message, MessageHandler,
    MessageReader, MessageWriter, OutboundMessage,
};
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "post-events";
const DLQ: &str = "dead-letter-events";
const GROUP: &str = "feed-processor-group";

/// Fails until `succeed_on` attempts have been made (0 = always fail).
struct FlakyHandler {
    calls: AtomicU32,
    succeed_on: u32,
}

impl FlakyHandler {
    fn new(succeed_on: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            succeed_on,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for FlakyHandler {
    async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.succeed_on != 0 && call >= self.succeed_on {
            Ok(())
        } else {
            Err(HandlerError::store("insert_feed_entries", "connection reset"))
        }
    }
}

struct PanickingHandler;

#[async_trait]
impl MessageHandler for PanickingHandler {
    async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
        panic!("fan-out exploded");
    }
}

struct RejectingWriter;

#[async_trait]
impl MessageWriter for RejectingWriter {
    async fn write(&self, _topic: &str, _messages: Vec<OutboundMessage>) -> Result<(), BrokerError> {
        Err(BrokerError::Unavailable("dead-letter topic offline".to_string()))
    }
}

enum Fetch {
    Fail,
    Deliver,
}

/// Reader that plays back a fixed sequence of fetch results, then waits
/// forever. Records when each fetch was made.
struct ScriptedReader {
    script: Mutex<VecDeque<Fetch>>,
    fetched_at: Mutex<Vec<Instant>>,
    commits: AtomicU32,
}

impl ScriptedReader {
    fn new(script: impl IntoIterator<Item = Fetch>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fetched_at: Mutex::new(Vec::new()),
            commits: AtomicU32::new(0),
        }
    }

    fn fetches(&self) -> usize {
        self.fetched_at.lock().expect("fetch log").len()
    }

    /// Time between consecutive fetches, in milliseconds.
    fn gaps_ms(&self) -> Vec<u128> {
        let fetched_at = self.fetched_at.lock().expect("fetch log");
        fetched_at
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect()
    }
}

#[async_trait]
impl MessageReader for ScriptedReader {
    fn topic(&self) -> &str {
        TOPIC
    }

    async fn fetch(&self) -> Result<Message, BrokerError> {
        self.fetched_at.lock().expect("fetch log").push(Instant::now());
        let next = self.script.lock().expect("script").pop_front();
        match next {
            Some(Fetch::Fail) => Err(BrokerError::Unavailable("broker offline".to_string())),
            Some(Fetch::Deliver) => Ok(Message {
                topic: TOPIC.to_string(),
                partition: 0,
                offset: 0,
                key: Bytes::from_static(b"alice"),
                value: Bytes::from_static(b"{}"),
                headers: Vec::new(),
                timestamp: OffsetDateTime::UNIX_EPOCH,
            }),
            None => std::future::pending().await,
        }
    }

    async fn commit(&self, _message: &Message) -> Result<(), BrokerError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config() -> ConsumerConfig {
    ConsumerConfig {
        max_retries: 3,
        retry_backoff: Duration::from_millis(1),
        fetch_backoff_initial: Duration::from_millis(1),
        fetch_backoff_max: Duration::from_millis(10),
        dead_letter_topic: Some(DLQ.to_string()),
    }
}

async fn publish_one(broker: &MemoryBroker) -> Message {
    broker
        .write(
            TOPIC,
            vec![OutboundMessage::new("alice", r#"{"event_id":1}"#).with_header("trace", "abc")],
        )
        .await
        .expect("write");
    broker.messages(TOPIC).remove(0)
}

fn consumer(
    broker: &MemoryBroker,
    handler: Arc<dyn MessageHandler>,
    dead_letters: Arc<dyn MessageWriter>,
    config: ConsumerConfig,
) -> ConsumerLoop {
    ConsumerLoop::new(
        "test-consumer",
        Arc::new(broker.reader(TOPIC, GROUP, 0, 1)),
        dead_letters,
        handler,
        config,
    )
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let broker = MemoryBroker::new(1);
    let message = publish_one(&broker).await;
    let handler = Arc::new(FlakyHandler::new(3));
    let consumer = consumer(&broker, handler.clone(), Arc::new(broker.clone()), config());

    let delivery = consumer.process(&message).await;

    assert_eq!(
        delivery,
        Delivery::Handled {
            attempts: 3,
            committed: true
        }
    );
    assert_eq!(handler.calls(), 3);
    assert!(broker.messages(DLQ).is_empty());
    assert_eq!(
        broker.committed_offset(GROUP, TOPIC, message.partition),
        Some(message.offset + 1)
    );
}

#[tokio::test]
async fn exhausted_retries_dead_letter_the_original_message() {
    let broker = MemoryBroker::new(1);
    let message = publish_one(&broker).await;
    let handler = Arc::new(FlakyHandler::new(0));
    let consumer = consumer(&broker, handler.clone(), Arc::new(broker.clone()), config());

    let delivery = consumer.process(&message).await;

    assert!(matches!(
        delivery,
        Delivery::DeadLettered {
            attempts: 3,
            committed: true,
            ..
        }
    ));
    assert_eq!(handler.calls(), 3);

    let dead = broker.messages(DLQ);
    assert_eq!(dead.len(), 1);
    let dead = &dead[0];
    assert_eq!(dead.key, message.key);
    assert_eq!(dead.value, message.value);
    assert_eq!(dead.header_str("trace"), Some("abc"));
    assert_eq!(dead.header_str(HEADER_ORIGINAL_TOPIC), Some(TOPIC));
    assert!(
        dead.header_str(HEADER_ERROR)
            .is_some_and(|error| error.contains("connection reset"))
    );
    assert!(dead.header_str(HEADER_FAILED_AT).is_some());
    assert_eq!(
        broker.committed_offset(GROUP, TOPIC, message.partition),
        Some(message.offset + 1)
    );
}

#[tokio::test]
async fn handler_panic_counts_as_a_failed_attempt() {
    let broker = MemoryBroker::new(1);
    let message = publish_one(&broker).await;
    let consumer = consumer(
        &broker,
        Arc::new(PanickingHandler),
        Arc::new(broker.clone()),
        config(),
    );

    let delivery = consumer.process(&message).await;

    match delivery {
        Delivery::DeadLettered {
            attempts,
            error: HandlerError::Panicked(reason),
            committed,
        } => {
            assert_eq!(attempts, 3);
            assert!(reason.contains("fan-out exploded"));
            assert!(committed);
        }
        other => panic!("unexpected delivery: {other:?}"),
    }
    assert_eq!(broker.messages(DLQ).len(), 1);
}

#[tokio::test]
async fn failed_dead_letter_publish_still_commits() {
    let broker = MemoryBroker::new(1);
    let message = publish_one(&broker).await;
    let consumer = consumer(
        &broker,
        Arc::new(FlakyHandler::new(0)),
        Arc::new(RejectingWriter),
        config(),
    );

    let delivery = consumer.process(&message).await;

    assert!(matches!(
        delivery,
        Delivery::Dropped {
            attempts: 3,
            committed: true,
            ..
        }
    ));
    assert_eq!(
        broker.committed_offset(GROUP, TOPIC, message.partition),
        Some(message.offset + 1)
    );
}

#[tokio::test]
async fn disabled_dead_lettering_drops_and_commits() {
    let broker = MemoryBroker::new(1);
    let message = publish_one(&broker).await;
    let consumer = consumer(
        &broker,
        Arc::new(FlakyHandler::new(0)),
        Arc::new(broker.clone()),
        ConsumerConfig {
            dead_letter_topic: None,
            ..config()
        },
    );

    let delivery = consumer.process(&message).await;

    assert!(matches!(delivery, Delivery::Dropped { committed: true, .. }));
    assert!(broker.messages(DLQ).is_empty());
}

#[tokio::test]
async fn run_loop_consumes_until_cancelled() {
    let broker = MemoryBroker::new(2);
    let handler = Arc::new(FlakyHandler::new(1));
    let consumer = consumer(&broker, handler.clone(), Arc::new(broker.clone()), config());
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { consumer.run(cancel).await }
    });

    broker
        .write(
            TOPIC,
            vec![
                OutboundMessage::new("alice", "1"),
                OutboundMessage::new("bob", "2"),
                OutboundMessage::new("carol", "3"),
            ],
        )
        .await
        .expect("write");

    for _ in 0..200 {
        if handler.calls() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(handler.calls(), 3);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop stops after cancellation")
        .expect("loop task");

    let reader = broker.reader(TOPIC, GROUP, 0, 1);
    let pending = tokio::time::timeout(Duration::from_millis(50), reader.fetch()).await;
    assert!(pending.is_err(), "every message was committed");
}

#[tokio::test(start_paused = true)]
async fn fetch_backoff_doubles_to_cap_and_resets_after_success() {
    let mut script: Vec<Fetch> = (0..10).map(|_| Fetch::Fail).collect();
    script.push(Fetch::Deliver);
    script.extend([Fetch::Fail, Fetch::Fail]);
    let reader = Arc::new(ScriptedReader::new(script));
    let handler = Arc::new(FlakyHandler::new(1));
    let consumer = ConsumerLoop::new(
        "backoff",
        reader.clone(),
        Arc::new(RejectingWriter),
        handler.clone(),
        ConsumerConfig::default(),
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { consumer.run(cancel).await }
    });

    for _ in 0..200 {
        if reader.fetches() == 14 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(reader.fetches(), 14);
    assert_eq!(
        reader.gaps_ms(),
        vec![
            100, 200, 400, 800, 1_600, 3_200, 6_400, 12_800, 25_600, 30_000, 0, 100, 200
        ]
    );
    assert_eq!(handler.calls(), 1);
    assert_eq!(reader.commits.load(Ordering::SeqCst), 1);

    cancel.cancel();
    task.await.expect("loop task");
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_fetch_backoff() {
    let reader = Arc::new(ScriptedReader::new([Fetch::Fail]));
    let consumer = ConsumerLoop::new(
        "cancel",
        reader.clone(),
        Arc::new(RejectingWriter),
        Arc::new(FlakyHandler::new(1)),
        ConsumerConfig {
            fetch_backoff_initial: Duration::from_secs(30),
            ..ConsumerConfig::default()
        },
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { consumer.run(cancel).await }
    });

    for _ in 0..100 {
        if reader.fetches() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(reader.fetches(), 1);

    let cancelled_at = Instant::now();
    cancel.cancel();
    task.await.expect("loop task");
    assert_eq!(cancelled_at.elapsed(), Duration::ZERO);
    assert_eq!(reader.fetches(), 1);
}
