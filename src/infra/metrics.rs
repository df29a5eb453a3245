//! [`PipelineMetrics`] backed by the `metrics` facade.
//!
//! Whatever recorder is installed (globally or scoped with
//! `metrics::with_local_recorder`) receives these series; exporter wiring
//! lives outside this crate.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::application::metrics::{CacheStatus, PipelineMetrics, ProcessStatus};

pub const EVENTS_PROCESSED_TOTAL: &str = "fanfeed_events_processed_total";
pub const EVENT_PROCESSING_SECONDS: &str = "fanfeed_event_processing_seconds";
pub const FEED_ROWS_WRITTEN_TOTAL: &str = "fanfeed_feed_rows_written_total";
pub const DEAD_LETTER_TOTAL: &str = "fanfeed_dead_letter_total";
pub const FEED_READS_TOTAL: &str = "fanfeed_feed_reads_total";

#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsRecorder;

impl PipelineMetrics for MetricsRecorder {
    fn event_processed(&self, kind: &'static str, status: ProcessStatus, elapsed: Duration) {
        counter!(EVENTS_PROCESSED_TOTAL, "type" => kind, "status" => status.as_str())
            .increment(1);
        histogram!(EVENT_PROCESSING_SECONDS, "type" => kind).record(elapsed.as_secs_f64());
    }

    fn fanout_written(&self, rows: u64) {
        counter!(FEED_ROWS_WRITTEN_TOTAL).increment(rows);
    }

    fn dead_lettered(&self, topic: &str) {
        counter!(DEAD_LETTER_TOTAL, "topic" => topic.to_string()).increment(1);
    }

    fn feed_read(&self, status: CacheStatus) {
        counter!(FEED_READS_TOTAL, "cache" => status.as_str()).increment(1);
    }
}
