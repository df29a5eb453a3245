//! Time-sortable 64-bit identifiers.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! | 1 bit unused | 41 bits ms since EPOCH_MS | 10 bits node | 12 bits sequence |
//! ```
//!
//! IDs from one generator are strictly increasing as long as the wall clock
//! does not move backwards. Node uniqueness across the fleet is an operational
//! concern; the generator only validates the range.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::warn;

use crate::util::lock::mutex_lock;

const SOURCE: &str = "ids";

/// Custom epoch: 2026-01-01T00:00:00Z in unix milliseconds.
pub const EPOCH_MS: i64 = 1_767_225_600_000;
pub const NODE_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;
pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
pub const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

const NODE_SHIFT: u32 = SEQUENCE_BITS;
const TIME_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("node id {0} is out of range (0..={max})", max = MAX_NODE_ID)]
    NodeOutOfRange(u16),
}

/// Millisecond wall clock used by the generator.
pub trait Clock: Send + Sync {
    /// Current unix time in milliseconds.
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Decoded components of a generated id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// Milliseconds since [`EPOCH_MS`].
    pub elapsed_ms: i64,
    pub node_id: u16,
    pub sequence: u16,
}

impl IdParts {
    pub fn decode(id: i64) -> Self {
        Self {
            elapsed_ms: id >> TIME_SHIFT,
            node_id: ((id >> NODE_SHIFT) & i64::from(MAX_NODE_ID)) as u16,
            sequence: (id & MAX_SEQUENCE) as u16,
        }
    }

    /// Unix milliseconds at which the id was minted.
    pub fn unix_millis(&self) -> i64 {
        self.elapsed_ms + EPOCH_MS
    }
}

#[derive(Debug)]
struct GeneratorState {
    last_ms: i64,
    sequence: i64,
}

/// Snowflake-style id generator for one node.
pub struct SnowflakeGenerator<C = SystemClock> {
    node_id: i64,
    clock: C,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator<SystemClock> {
    pub fn new(node_id: u16) -> Result<Self, IdError> {
        Self::with_clock(node_id, SystemClock)
    }
}

impl<C: Clock> SnowflakeGenerator<C> {
    pub fn with_clock(node_id: u16, clock: C) -> Result<Self, IdError> {
        if node_id > MAX_NODE_ID {
            return Err(IdError::NodeOutOfRange(node_id));
        }
        Ok(Self {
            node_id: i64::from(node_id),
            clock,
            state: Mutex::new(GeneratorState {
                last_ms: -1,
                sequence: 0,
            }),
        })
    }

    pub fn node_id(&self) -> u16 {
        self.node_id as u16
    }

    /// Mint the next id.
    ///
    /// When 4096 ids have been handed out within one millisecond the call
    /// waits, yielding the thread between clock reads, until the next
    /// millisecond begins.
    pub fn generate(&self) -> i64 {
        let mut state = mutex_lock(&self.state, SOURCE, "generate");

        let mut now = self.elapsed_ms();
        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    std::thread::yield_now();
                    now = self.elapsed_ms();
                }
            }
        } else {
            if now < state.last_ms {
                warn!(
                    node_id = self.node_id,
                    last_ms = state.last_ms,
                    now_ms = now,
                    "Clock moved backwards; ids may collide with earlier ones"
                );
            }
            state.sequence = 0;
        }
        state.last_ms = now;

        (now << TIME_SHIFT) | (self.node_id << NODE_SHIFT) | state.sequence
    }

    fn elapsed_ms(&self) -> i64 {
        self.clock.now_millis() - EPOCH_MS
    }
}
