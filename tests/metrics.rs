use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fanfeed::application::fanout::{FanoutConfig, FanoutHandler};
use fanfeed::application::feed::FeedService;
use fanfeed::application::metrics::PipelineMetrics;
use fanfeed::application::repos::FollowersRepo;
use fanfeed::broker::memory::MemoryBroker;
use fanfeed::broker::{ConsumerConfig, ConsumerLoop, MessageWriter, OutboundMessage};
use fanfeed::cache::{CacheConfig, MemoryFeedCache};
use fanfeed::infra::memory::MemoryRepositories;
use fanfeed::infra::metrics::{
    DEAD_LETTER_TOTAL, EVENT_PROCESSING_SECONDS, EVENTS_PROCESSED_TOTAL, FEED_READS_TOTAL,
    FEED_ROWS_WRITTEN_TOTAL, MetricsRecorder,
};
use fanfeed_api_types::Event;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

type Series = HashMap<(String, Vec<(String, String)>), DebugValue>;

fn collect(snapshotter: &Snapshotter) -> Series {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let key = composite_key.key();
            let mut labels: Vec<(String, String)> = key
                .labels()
                .map(|label| (label.key().to_string(), label.value().to_string()))
                .collect();
            labels.sort();
            ((key.name().to_string(), labels), value)
        })
        .collect()
}

fn counter(series: &Series, name: &str, labels: &[(&str, &str)]) -> u64 {
    let mut labels: Vec<(String, String)> = labels
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    labels.sort();
    match series.get(&(name.to_string(), labels)) {
        Some(DebugValue::Counter(value)) => *value,
        _ => 0,
    }
}

#[tokio::test]
async fn consumer_and_read_path_emit_labelled_series() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let metrics: Arc<dyn PipelineMetrics> = Arc::new(MetricsRecorder);
    let broker = MemoryBroker::new(1);
    let repos = MemoryRepositories::new();
    repos.follow("bob", "alice").await.expect("follow");
    repos.follow("carol", "alice").await.expect("follow");

    let shared = Arc::new(repos.clone());
    let handler = Arc::new(
        FanoutHandler::new(
            shared.clone(),
            shared.clone(),
            shared.clone(),
            shared.clone(),
            FanoutConfig::default(),
        )
        .with_metrics(metrics.clone()),
    );
    let consumer = ConsumerLoop::new(
        "metrics",
        Arc::new(broker.reader("post-events", "group", 0, 1)),
        Arc::new(broker.clone()),
        handler,
        ConsumerConfig {
            retry_backoff: Duration::from_millis(1),
            ..ConsumerConfig::default()
        },
    )
    .with_metrics(metrics.clone());

    let created = Event::post_created(1, 10, "alice", "hello", 1_700_000_000)
        .to_bytes()
        .expect("encode");
    broker
        .write(
            "post-events",
            vec![
                OutboundMessage::new("alice", created),
                OutboundMessage::new("alice", "garbage"),
            ],
        )
        .await
        .expect("write");
    for message in broker.messages("post-events") {
        consumer.process(&message).await;
    }

    let feeds = FeedService::new(
        shared,
        Arc::new(MemoryFeedCache::new(&CacheConfig::default())),
    )
    .with_metrics(metrics);
    feeds.get_feed("bob", None, None).await.expect("feed");
    feeds.get_feed("bob", None, Some(1)).await.expect("feed");

    let series = collect(&snapshotter);
    assert_eq!(
        counter(
            &series,
            EVENTS_PROCESSED_TOTAL,
            &[("type", "POST_CREATED"), ("status", "success")]
        ),
        1
    );
    assert_eq!(
        counter(
            &series,
            EVENTS_PROCESSED_TOTAL,
            &[("type", "MALFORMED"), ("status", "dead_lettered")]
        ),
        1
    );
    assert_eq!(counter(&series, FEED_ROWS_WRITTEN_TOTAL, &[]), 2);
    assert_eq!(
        counter(&series, DEAD_LETTER_TOTAL, &[("topic", "dead-letter-events")]),
        1
    );
    assert_eq!(counter(&series, FEED_READS_TOTAL, &[("cache", "miss")]), 1);
    assert_eq!(counter(&series, FEED_READS_TOTAL, &[("cache", "bypass")]), 1);
    assert!(
        series
            .keys()
            .any(|(name, _)| name == EVENT_PROCESSING_SECONDS),
        "processing latency histogram recorded"
    );
}
