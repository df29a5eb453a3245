use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;
use super::metrics::{
    DEAD_LETTER_TOTAL, EVENT_PROCESSING_SECONDS, EVENTS_PROCESSED_TOTAL, FEED_READS_TOTAL,
    FEED_ROWS_WRITTEN_TOTAL,
};

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            EVENTS_PROCESSED_TOTAL,
            Unit::Count,
            "Consumed events by type and final status."
        );
        describe_histogram!(
            EVENT_PROCESSING_SECONDS,
            Unit::Seconds,
            "Time from first handler attempt to final outcome, retries included."
        );
        describe_counter!(
            FEED_ROWS_WRITTEN_TOTAL,
            Unit::Count,
            "Feed entries written by fan-out."
        );
        describe_counter!(
            DEAD_LETTER_TOTAL,
            Unit::Count,
            "Messages published to a dead-letter topic."
        );
        describe_counter!(
            FEED_READS_TOTAL,
            Unit::Count,
            "Feed reads by cache outcome."
        );
    });
}
