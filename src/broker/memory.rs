//! In-process partitioned log.
//!
//! Topics are created on first write. Every topic has the broker's partition
//! count. Committed offsets are tracked per `(group, topic, partition)` and a
//! new reader resumes from them, so a restarted consumer loop inside the same
//! process sees exactly the uncommitted tail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Notify;

use crate::util::lock::mutex_lock;

use super::{
    BrokerError, Message, MessageReader, MessageWriter, OutboundMessage, assigned_partitions,
    partition_for,
};

const SOURCE: &str = "broker::memory";

#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    partitions: u32,
    state: Mutex<State>,
    appended: Notify,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Vec<Vec<Message>>>,
    /// Next offset to read, keyed by `(group, topic)` then partition.
    committed: HashMap<(String, String), HashMap<u32, i64>>,
}

impl MemoryBroker {
    pub fn new(partitions: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(State::default()),
                appended: Notify::new(),
            }),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.inner.partitions
    }

    /// Reader for `topic` that owns the partitions assigned to `member_index`.
    pub fn reader(
        &self,
        topic: impl Into<String>,
        group_id: impl Into<String>,
        member_index: u32,
        members: u32,
    ) -> MemoryReader {
        let topic = topic.into();
        let group_id = group_id.into();
        let partitions = assigned_partitions(self.inner.partitions, member_index, members);

        let positions = {
            let state = mutex_lock(&self.inner.state, SOURCE, "reader");
            let committed = state.committed.get(&(group_id.clone(), topic.clone()));
            partitions
                .iter()
                .map(|partition| {
                    let next = committed
                        .and_then(|offsets| offsets.get(partition))
                        .copied()
                        .unwrap_or(0);
                    (*partition, next)
                })
                .collect()
        };

        MemoryReader {
            broker: self.clone(),
            topic,
            group_id,
            partitions,
            cursor: Mutex::new(ReaderCursor {
                positions,
                next_slot: 0,
            }),
        }
    }

    /// Every message currently stored for `topic`, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        let state = mutex_lock(&self.inner.state, SOURCE, "messages");
        state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Next offset the group will read from `partition`, if it ever committed.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: u32) -> Option<i64> {
        let state = mutex_lock(&self.inner.state, SOURCE, "committed_offset");
        state
            .committed
            .get(&(group_id.to_string(), topic.to_string()))
            .and_then(|offsets| offsets.get(&partition))
            .copied()
    }
}

#[async_trait]
impl MessageWriter for MemoryBroker {
    async fn write(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<(), BrokerError> {
        if messages.is_empty() {
            return Ok(());
        }
        {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "write");
            let partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.inner.partitions as usize]);
            let timestamp = OffsetDateTime::now_utc();

            for outbound in messages {
                let partition = partition_for(&outbound.key, self.inner.partitions);
                let log = &mut partitions[partition as usize];
                let offset = log.len() as i64;
                log.push(Message {
                    topic: topic.to_string(),
                    partition,
                    offset,
                    key: outbound.key,
                    value: outbound.value,
                    headers: outbound.headers,
                    timestamp,
                });
            }
        }
        self.inner.appended.notify_waiters();
        Ok(())
    }
}

struct ReaderCursor {
    positions: HashMap<u32, i64>,
    next_slot: usize,
}

pub struct MemoryReader {
    broker: MemoryBroker,
    topic: String,
    group_id: String,
    partitions: Vec<u32>,
    cursor: Mutex<ReaderCursor>,
}

impl MemoryReader {
    pub fn partitions(&self) -> &[u32] {
        &self.partitions
    }

    fn try_next(&self) -> Option<Message> {
        if self.partitions.is_empty() {
            return None;
        }
        let state = mutex_lock(&self.broker.inner.state, SOURCE, "fetch");
        let logs = state.topics.get(&self.topic)?;
        let mut cursor = mutex_lock(&self.cursor, SOURCE, "fetch.cursor");

        for step in 0..self.partitions.len() {
            let slot = (cursor.next_slot + step) % self.partitions.len();
            let partition = self.partitions[slot];
            let position = cursor.positions.get(&partition).copied().unwrap_or(0);
            let Some(message) = logs[partition as usize].get(position as usize) else {
                continue;
            };
            let message = message.clone();
            cursor.positions.insert(partition, position + 1);
            cursor.next_slot = (slot + 1) % self.partitions.len();
            return Some(message);
        }
        None
    }
}

#[async_trait]
impl MessageReader for MemoryReader {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> Result<Message, BrokerError> {
        loop {
            let appended = self.broker.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(message) = self.try_next() {
                return Ok(message);
            }
            appended.await;
        }
    }

    async fn commit(&self, message: &Message) -> Result<(), BrokerError> {
        let mut state = mutex_lock(&self.broker.inner.state, SOURCE, "commit");
        let next = state
            .committed
            .entry((self.group_id.clone(), message.topic.clone()))
            .or_default()
            .entry(message.partition)
            .or_insert(0);
        *next = (*next).max(message.offset + 1);
        Ok(())
    }
}
