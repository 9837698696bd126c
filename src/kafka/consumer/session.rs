//! One generation of consumer group membership
//!
//! A [`GroupSession`] is handed to the handler's `setup`, every
//! `consume_claim` and `cleanup` of a generation. It stages the positions
//! the handler marks, commits them synchronously on request, and exposes
//! the cancellation token that fires the instant the generation ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::group::GroupContext;
use super::message::ConsumerMessage;
use crate::kafka::{KafkaError, Result};

/// Timeout for repositioning a partition after a failed message
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Session operations available to consumer group handlers
#[async_trait]
pub trait GroupSession: Send + Sync {
    /// Generation number of this membership, increasing per rebalance
    fn generation(&self) -> i32;

    /// (topic, partition) pairs claimed in this generation
    fn assignment(&self) -> &[(String, i32)];

    /// Fires when the generation ends (rebalance or shutdown)
    fn cancellation(&self) -> &CancellationToken;

    /// Stage `message.offset + 1` as the position of its partition
    ///
    /// Positions only move forward through this call.
    fn mark_message(&self, message: &ConsumerMessage);

    /// Stage `offset` as the position of a partition, even if it is behind
    fn reset_offset(&self, topic: &str, partition: i32, offset: i64);

    /// Re-fetch a partition starting at `offset`
    async fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    /// Synchronously commit every staged position
    ///
    /// On failure the positions stay staged and go out with the next commit.
    async fn commit(&self) -> Result<()>;
}

/// Positions staged since the last successful commit
#[derive(Debug, Default)]
pub(crate) struct StagedOffsets {
    positions: Mutex<HashMap<(String, i32), i64>>,
}

impl StagedOffsets {
    pub(crate) fn advance(&self, topic: &str, partition: i32, position: i64) {
        let mut positions = self.positions.lock();
        let entry = positions
            .entry((topic.to_string(), partition))
            .or_insert(position);
        if *entry < position {
            *entry = position;
        }
    }

    pub(crate) fn reset(&self, topic: &str, partition: i32, position: i64) {
        self.positions
            .lock()
            .insert((topic.to_string(), partition), position);
    }

    pub(crate) fn snapshot(&self) -> Vec<((String, i32), i64)> {
        let mut staged: Vec<_> = self
            .positions
            .lock()
            .iter()
            .map(|(tp, offset)| (tp.clone(), *offset))
            .collect();
        staged.sort();
        staged
    }

    /// Drop entries that were committed and not re-staged since
    pub(crate) fn acknowledge(&self, committed: &[((String, i32), i64)]) {
        let mut positions = self.positions.lock();
        for (tp, offset) in committed {
            if positions.get(tp) == Some(offset) {
                positions.remove(tp);
            }
        }
    }
}

/// [`GroupSession`] backed by an rdkafka `StreamConsumer`
pub struct KafkaSession {
    consumer: Arc<StreamConsumer<GroupContext>>,
    generation: i32,
    assignment: Vec<(String, i32)>,
    token: CancellationToken,
    staged: StagedOffsets,
    /// Set once the partitions were handed over without this session
    /// finishing; later commits are dropped
    revoked: Arc<AtomicBool>,
}

impl KafkaSession {
    pub(crate) fn new(
        consumer: Arc<StreamConsumer<GroupContext>>,
        generation: i32,
        assignment: Vec<(String, i32)>,
        token: CancellationToken,
    ) -> Self {
        Self {
            consumer,
            generation,
            assignment,
            token,
            staged: StagedOffsets::default(),
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with the rebalance callback
    pub(crate) fn revocation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.revoked)
    }

    pub(crate) fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }
}

#[async_trait]
impl GroupSession for KafkaSession {
    fn generation(&self) -> i32 {
        self.generation
    }

    fn assignment(&self) -> &[(String, i32)] {
        &self.assignment
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    fn mark_message(&self, message: &ConsumerMessage) {
        self.staged
            .advance(&message.topic, message.partition, message.next_offset());
    }

    fn reset_offset(&self, topic: &str, partition: i32, offset: i64) {
        self.staged.reset(topic, partition, offset);
    }

    async fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);
        let topic = topic.to_string();
        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
        })
        .await
        .map_err(|e| KafkaError::Io(std::io::Error::other(e)))?
        .map_err(|e| KafkaError::client("seek", e))
    }

    async fn commit(&self) -> Result<()> {
        let staged = self.staged.snapshot();
        if staged.is_empty() {
            return Ok(());
        }
        if self.is_revoked() {
            warn!(
                generation = self.generation,
                positions = staged.len(),
                "Dropping commit of a revoked generation"
            );
            self.staged.acknowledge(&staged);
            return Ok(());
        }

        let mut tpl = TopicPartitionList::with_capacity(staged.len());
        for ((topic, partition), offset) in &staged {
            tpl.add_partition_offset(topic, *partition, Offset::Offset(*offset))
                .map_err(|e| KafkaError::client("commit", e))?;
        }

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| KafkaError::Io(std::io::Error::other(e)))?
            .map_err(|e| KafkaError::client("commit", e))?;

        self.staged.acknowledge(&staged);
        Ok(())
    }
}
