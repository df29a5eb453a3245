//! Partitioned log stored in Postgres.
//!
//! `broker_partitions` holds the next offset of every `(topic, partition)`
//! and is row-locked while a batch is appended, which keeps offsets dense and
//! ordered per partition. Readers poll their assigned partitions round-robin.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{FromRow, query, query_as, query_scalar};
use time::OffsetDateTime;
use tracing::trace;

use crate::util::lock::mutex_lock;

use super::{
    BrokerError, Header, Message, MessageReader, MessageWriter, OutboundMessage,
    assigned_partitions, partition_for,
};

const SOURCE: &str = "broker::postgres";

#[derive(Clone)]
pub struct PostgresBroker {
    pool: Arc<PgPool>,
    partitions: u32,
    poll_interval: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredHeader {
    key: String,
    value: String,
}

#[derive(FromRow)]
struct MessageRow {
    topic: String,
    partition: i32,
    offset: i64,
    key: Vec<u8>,
    value: Vec<u8>,
    headers: Json<Vec<StoredHeader>>,
    created_at: OffsetDateTime,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, BrokerError> {
        let headers = self
            .headers
            .0
            .into_iter()
            .map(|header| {
                BASE64
                    .decode(header.value.as_bytes())
                    .map(|value| Header::new(header.key, value))
                    .map_err(|err| BrokerError::Decode(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let partition = u32::try_from(self.partition)
            .map_err(|_| BrokerError::Decode(format!("negative partition {}", self.partition)))?;

        Ok(Message {
            topic: self.topic,
            partition,
            offset: self.offset,
            key: Bytes::from(self.key),
            value: Bytes::from(self.value),
            headers,
            timestamp: self.created_at,
        })
    }
}

fn encode_headers(headers: &[Header]) -> Vec<StoredHeader> {
    headers
        .iter()
        .map(|header| StoredHeader {
            key: header.key.clone(),
            value: BASE64.encode(&header.value),
        })
        .collect()
}

impl PostgresBroker {
    pub fn new(pool: PgPool, partitions: u32, poll_interval: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            partitions: partitions.max(1),
            poll_interval,
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Reader for `topic` starting at the group's committed offsets.
    pub async fn reader(
        &self,
        topic: impl Into<String>,
        group_id: impl Into<String>,
        member_index: u32,
        members: u32,
    ) -> Result<PostgresReader, BrokerError> {
        let topic = topic.into();
        let group_id = group_id.into();
        let partitions = assigned_partitions(self.partitions, member_index, members);

        let committed: Vec<(i32, i64)> = query_as(
            "SELECT partition, committed_offset FROM broker_group_offsets \
             WHERE group_id = $1 AND topic = $2",
        )
        .bind(&group_id)
        .bind(&topic)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(BrokerError::unavailable)?;
        let committed: HashMap<i32, i64> = committed.into_iter().collect();

        let positions = partitions
            .iter()
            .map(|partition| {
                let next = committed.get(&(*partition as i32)).copied().unwrap_or(0);
                (*partition, next)
            })
            .collect();

        Ok(PostgresReader {
            pool: Arc::clone(&self.pool),
            topic,
            group_id,
            partitions,
            poll_interval: self.poll_interval,
            cursor: Mutex::new(ReaderCursor {
                positions,
                next_slot: 0,
            }),
        })
    }
}

#[async_trait]
impl MessageWriter for PostgresBroker {
    async fn write(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<(), BrokerError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(BrokerError::unavailable)?;

        for message in messages {
            let partition = partition_for(&message.key, self.partitions) as i32;
            let offset: i64 = query_scalar(
                "INSERT INTO broker_partitions (topic, partition, next_offset) \
                 VALUES ($1, $2, 1) \
                 ON CONFLICT (topic, partition) \
                 DO UPDATE SET next_offset = broker_partitions.next_offset + 1 \
                 RETURNING next_offset - 1",
            )
            .bind(topic)
            .bind(partition)
            .fetch_one(&mut *tx)
            .await
            .map_err(BrokerError::unavailable)?;

            query(
                "INSERT INTO broker_messages \
                 (topic, partition, \"offset\", key, value, headers) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(topic)
            .bind(partition)
            .bind(offset)
            .bind(message.key.as_ref())
            .bind(message.value.as_ref())
            .bind(Json(encode_headers(&message.headers)))
            .execute(&mut *tx)
            .await
            .map_err(BrokerError::unavailable)?;
        }

        tx.commit().await.map_err(BrokerError::unavailable)
    }
}

struct ReaderCursor {
    positions: HashMap<u32, i64>,
    next_slot: usize,
}

pub struct PostgresReader {
    pool: Arc<PgPool>,
    topic: String,
    group_id: String,
    partitions: Vec<u32>,
    poll_interval: Duration,
    cursor: Mutex<ReaderCursor>,
}

impl PostgresReader {
    fn next_target(&self, step: usize) -> (u32, i64) {
        let cursor = mutex_lock(&self.cursor, SOURCE, "next_target");
        let slot = (cursor.next_slot + step) % self.partitions.len();
        let partition = self.partitions[slot];
        let position = cursor.positions.get(&partition).copied().unwrap_or(0);
        (partition, position)
    }

    fn advance(&self, message: &Message) {
        let mut cursor = mutex_lock(&self.cursor, SOURCE, "advance");
        cursor.positions.insert(message.partition, message.offset + 1);
        if let Some(slot) = self.partitions.iter().position(|p| *p == message.partition) {
            cursor.next_slot = (slot + 1) % self.partitions.len();
        }
    }

    async fn read_at(&self, partition: u32, position: i64) -> Result<Option<Message>, BrokerError> {
        let row: Option<MessageRow> = query_as(
            "SELECT topic, partition, \"offset\", key, value, headers, created_at \
             FROM broker_messages \
             WHERE topic = $1 AND partition = $2 AND \"offset\" >= $3 \
             ORDER BY \"offset\" ASC \
             LIMIT 1",
        )
        .bind(&self.topic)
        .bind(partition as i32)
        .bind(position)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(BrokerError::unavailable)?;

        row.map(MessageRow::into_message).transpose()
    }
}

#[async_trait]
impl MessageReader for PostgresReader {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> Result<Message, BrokerError> {
        if self.partitions.is_empty() {
            return std::future::pending().await;
        }
        loop {
            for step in 0..self.partitions.len() {
                let (partition, position) = self.next_target(step);
                if let Some(message) = self.read_at(partition, position).await? {
                    self.advance(&message);
                    return Ok(message);
                }
            }
            trace!(
                target = "fanfeed::broker::postgres",
                topic = %self.topic,
                group_id = %self.group_id,
                "no messages; polling again"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn commit(&self, message: &Message) -> Result<(), BrokerError> {
        query(
            "INSERT INTO broker_group_offsets (group_id, topic, partition, committed_offset) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (group_id, topic, partition) \
             DO UPDATE SET committed_offset = \
                 GREATEST(broker_group_offsets.committed_offset, EXCLUDED.committed_offset)",
        )
        .bind(&self.group_id)
        .bind(&message.topic)
        .bind(message.partition as i32)
        .bind(message.offset + 1)
        .execute(self.pool.as_ref())
        .await
        .map_err(BrokerError::unavailable)?;
        Ok(())
    }
}
