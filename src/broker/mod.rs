//! Partitioned message log abstraction.
//!
//! Messages are appended to a topic, routed to a partition by a hash of their
//! key, and read back by consumer groups which commit their progress per
//! partition. Two backends implement the seam: [`memory::MemoryBroker`] for a
//! single process and [`postgres::PostgresBroker`] for durable, multi-process
//! deployments.

pub mod consumer;
pub mod dead_letter;
pub mod memory;
pub mod postgres;
pub mod producer;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

pub use consumer::{ConsumerConfig, ConsumerLoop, Delivery, HandlerError, MessageHandler};
pub use producer::{Producer, ProducerConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Bytes,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A message as read from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    pub key: Bytes,
    pub value: Bytes,
    pub headers: Vec<Header>,
    pub timestamp: OffsetDateTime,
}

impl Message {
    /// First header named `key`, decoded as UTF-8.
    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.key == key)
            .and_then(|header| std::str::from_utf8(&header.value).ok())
    }
}

/// A message to be appended; the broker assigns partition and offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub key: Bytes,
    pub value: Bytes,
    pub headers: Vec<Header>,
}

impl OutboundMessage {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("broker connection closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
}

impl BrokerError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// A consumer-group member bound to one topic.
#[async_trait]
pub trait MessageReader: Send + Sync {
    fn topic(&self) -> &str;

    /// Wait for the next message on any assigned partition. Dropping the
    /// future before it resolves does not lose a message.
    async fn fetch(&self) -> Result<Message, BrokerError>;

    /// Record `message` as consumed for the group.
    async fn commit(&self, message: &Message) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Append `messages` to `topic`. Either all are accepted or the call fails.
    async fn write(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<(), BrokerError>;
}

/// Partition for `key`: FNV-1a over the key bytes, modulo `partitions`.
/// Messages sharing a key always land on the same partition.
pub fn partition_for(key: &[u8], partitions: u32) -> u32 {
    if key.is_empty() || partitions <= 1 {
        return 0;
    }
    fnv1a32(key) % partitions
}

fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(PRIME)
    })
}

/// Partitions owned by member `member_index` of a group with `members` members.
pub fn assigned_partitions(partitions: u32, member_index: u32, members: u32) -> Vec<u32> {
    let members = members.max(1);
    (0..partitions)
        .filter(|partition| partition % members == member_index % members)
        .collect()
}
