//! Recorder capability handed to pipeline components.

use std::time::Duration;

/// Outcome label of one consumed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Success,
    Failed,
    DeadLettered,
}

impl ProcessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Page other than the first; the cache is not consulted.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

pub trait PipelineMetrics: Send + Sync {
    fn event_processed(&self, kind: &'static str, status: ProcessStatus, elapsed: Duration);
    fn fanout_written(&self, rows: u64);
    fn dead_lettered(&self, topic: &str);
    fn feed_read(&self, status: CacheStatus);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl PipelineMetrics for NoopMetrics {
    fn event_processed(&self, _kind: &'static str, _status: ProcessStatus, _elapsed: Duration) {}
    fn fanout_written(&self, _rows: u64) {}
    fn dead_lettered(&self, _topic: &str) {}
    fn feed_read(&self, _status: CacheStatus) {}
}
