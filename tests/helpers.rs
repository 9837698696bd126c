// Test helpers for kafka_eos integration tests
//
// Broker-free implementations of the public extension traits, so the
// pool and the claim loop can be driven through the public API only.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kafka_eos::kafka::consumer::{Claim, ConsumerMessage, GroupSession};
use kafka_eos::kafka::producer::TransactionalHandle;
use kafka_eos::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shared record of closed handle ids
#[derive(Debug, Clone, Default)]
pub struct CloseLog(Arc<Mutex<Vec<String>>>);

impl CloseLog {
    pub fn contains(&self, id: &str) -> bool {
        self.0.lock().unwrap().iter().any(|c| c == id)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Producer handle that only tracks its id and health
#[derive(Debug)]
pub struct TestProducer {
    id: String,
    broken: AtomicBool,
    closed: CloseLog,
}

impl TestProducer {
    pub fn new(id: String, closed: CloseLog) -> Self {
        TestProducer {
            id,
            broken: AtomicBool::new(false),
            closed,
        }
    }

    pub fn break_transaction(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

impl TransactionalHandle for TestProducer {
    fn transactional_id(&self) -> &str {
        &self.id
    }

    fn in_transactional_error(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn close(self) {
        self.closed.0.lock().unwrap().push(self.id);
    }
}

/// Group session keeping positions in memory and logging every commit
#[derive(Debug, Default)]
pub struct MemorySession {
    token: CancellationToken,
    positions: Mutex<HashMap<(String, i32), i64>>,
    commits: Mutex<Vec<(String, i32, i64)>>,
    seeks: Mutex<Vec<(String, i32, i64)>>,
}

impl MemorySession {
    pub fn committed(&self, topic: &str, partition: i32) -> Vec<i64> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, p, _)| t == topic && *p == partition)
            .map(|(_, _, offset)| *offset)
            .collect()
    }

    pub fn seek_count(&self) -> usize {
        self.seeks.lock().unwrap().len()
    }
}

#[async_trait]
impl GroupSession for MemorySession {
    fn generation(&self) -> i32 {
        1
    }

    fn assignment(&self) -> &[(String, i32)] {
        &[]
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    fn mark_message(&self, message: &ConsumerMessage) {
        let mut positions = self.positions.lock().unwrap();
        let entry = positions
            .entry((message.topic.clone(), message.partition))
            .or_insert(message.next_offset());
        *entry = (*entry).max(message.next_offset());
    }

    fn reset_offset(&self, topic: &str, partition: i32, offset: i64) {
        self.positions
            .lock()
            .unwrap()
            .insert((topic.to_string(), partition), offset);
    }

    async fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        self.seeks
            .lock()
            .unwrap()
            .push((topic.to_string(), partition, offset));
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let staged: Vec<_> = self.positions.lock().unwrap().drain().collect();
        let mut commits = self.commits.lock().unwrap();
        for ((topic, partition), offset) in staged {
            commits.push((topic, partition, offset));
        }
        Ok(())
    }
}

/// Claim yielding `offsets` in order, closed afterwards
pub fn claim_of(topic: &str, partition: i32, offsets: &[i64]) -> Claim {
    let (tx, rx) = mpsc::channel(offsets.len().max(1));
    for offset in offsets {
        tx.try_send(ConsumerMessage::new(topic, partition, *offset, "payload"))
            .unwrap();
    }
    Claim::new(topic, partition, rx)
}
