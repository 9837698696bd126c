//! In-memory stand-ins for broker-backed types

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::kafka::admin::{ClusterAdmin, EntityOutcome, PartitionOutcome, TopicSpec};
use crate::kafka::constants::{
    error_name, ERROR_GROUP_ID_NOT_FOUND, ERROR_NONE, ERROR_UNKNOWN_TOPIC_OR_PARTITION,
};
use crate::kafka::consumer::session::StagedOffsets;
use crate::kafka::consumer::{ConsumerMessage, GroupSession};
use crate::kafka::log_sink::{LogEvent, LogSink};
use crate::kafka::producer::TransactionalHandle;
use crate::kafka::{KafkaError, Result};

#[derive(Debug, Default)]
struct ProbeState {
    created: usize,
    closed: Vec<String>,
}

/// Shared record of the producers a factory created and closed
#[derive(Debug, Clone, Default)]
pub struct ProducerProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl ProducerProbe {
    pub fn create(&self, id: String) -> FakeProducer {
        self.state.lock().created += 1;
        FakeProducer {
            id,
            poisoned: AtomicBool::new(false),
            probe: self.clone(),
        }
    }

    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed.len()
    }

    pub fn was_closed(&self, id: &str) -> bool {
        self.state.lock().closed.iter().any(|c| c == id)
    }
}

/// Producer handle without a client behind it
#[derive(Debug)]
pub struct FakeProducer {
    id: String,
    poisoned: AtomicBool,
    probe: ProducerProbe,
}

impl FakeProducer {
    /// Put the handle into the transactional error state
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }
}

impl TransactionalHandle for FakeProducer {
    fn transactional_id(&self) -> &str {
        &self.id
    }

    fn in_transactional_error(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    fn close(self) {
        self.probe.state.lock().closed.push(self.id);
    }
}

/// Log sink keeping every event for assertions
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LogEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, operation: &str) -> Vec<LogEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.operation == operation)
            .cloned()
            .collect()
    }

    pub fn count_operation(&self, operation: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.operation == operation)
            .count()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, event: LogEvent) {
        self.events.lock().push(event);
    }
}

/// Group session recording commits and seeks instead of sending them
#[derive(Debug)]
pub struct RecordingSession {
    generation: i32,
    assignment: Vec<(String, i32)>,
    token: CancellationToken,
    staged: StagedOffsets,
    commits: Mutex<Vec<Vec<((String, i32), i64)>>>,
    seeks: Mutex<Vec<(String, i32, i64)>>,
    failing_commits: AtomicUsize,
}

impl RecordingSession {
    pub fn new(generation: i32) -> Self {
        Self {
            generation,
            assignment: Vec::new(),
            token: CancellationToken::new(),
            staged: StagedOffsets::default(),
            commits: Mutex::new(Vec::new()),
            seeks: Mutex::new(Vec::new()),
            failing_commits: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` non-empty commits fail
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Positions of `topic/partition` in every successful commit, in order
    pub fn committed_positions(&self, topic: &str, partition: i32) -> Vec<i64> {
        self.commits
            .lock()
            .iter()
            .flat_map(|commit| commit.iter())
            .filter(|((t, p), _)| t == topic && *p == partition)
            .map(|(_, offset)| *offset)
            .collect()
    }

    pub fn seeks(&self) -> Vec<(String, i32, i64)> {
        self.seeks.lock().clone()
    }
}

#[async_trait]
impl GroupSession for RecordingSession {
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
        self.seeks.lock().push((topic.to_string(), partition, offset));
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let staged = self.staged.snapshot();
        if staged.is_empty() {
            return Ok(());
        }

        let remaining = self.failing_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(KafkaError::Coordinator("injected commit failure".to_string()));
        }

        self.commits.lock().push(staged.clone());
        self.staged.acknowledge(&staged);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    topics: BTreeMap<String, i32>,
    offsets: HashMap<String, BTreeMap<(String, i32), i64>>,
}

/// A cluster held in memory, answering admin requests like a broker
///
/// Offset deletion is applied partition by partition, so a request naming
/// a missing partition leaves the others deleted.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn add_topic(&self, name: &str, partitions: i32) {
        self.state.lock().topics.insert(name.to_string(), partitions);
    }

    pub fn partition_count(&self, name: &str) -> Option<i32> {
        self.state.lock().topics.get(name).copied()
    }

    /// Record a committed offset, creating the group if needed
    pub fn commit(&self, group: &str, topic: &str, partition: i32, offset: i64) {
        self.state
            .lock()
            .offsets
            .entry(group.to_string())
            .or_default()
            .insert((topic.to_string(), partition), offset);
    }

    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .offsets
            .get(group)
            .and_then(|offsets| offsets.get(&(topic.to_string(), partition)).copied())
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.state.lock().offsets.contains_key(group)
    }
}

#[async_trait]
impl ClusterAdmin for InMemoryCluster {
    async fn create_topics(&self, topics: Vec<TopicSpec>, _timeout: Duration) -> Result<Vec<EntityOutcome>> {
        let mut state = self.state.lock();
        Ok(topics
            .into_iter()
            .map(|spec| {
                if state.topics.contains_key(&spec.name) {
                    EntityOutcome::failed(spec.name, "TopicAlreadyExists")
                } else {
                    state.topics.insert(spec.name.clone(), spec.partitions);
                    EntityOutcome::ok(spec.name)
                }
            })
            .collect())
    }

    async fn delete_groups(&self, groups: Vec<String>, _timeout: Duration) -> Result<Vec<EntityOutcome>> {
        let mut state = self.state.lock();
        Ok(groups
            .into_iter()
            .map(|group| match state.offsets.remove(&group) {
                Some(_) => EntityOutcome::ok(group),
                None => EntityOutcome::failed(group, error_name(ERROR_GROUP_ID_NOT_FOUND)),
            })
            .collect())
    }

    async fn delete_offsets(
        &self,
        group: String,
        partitions: BTreeMap<String, BTreeSet<i32>>,
        _timeout: Duration,
    ) -> Result<Vec<PartitionOutcome>> {
        let mut state = self.state.lock();
        let ClusterState { topics, offsets } = &mut *state;
        let committed = offsets
            .get_mut(&group)
            .ok_or_else(|| KafkaError::protocol("OffsetDelete", ERROR_GROUP_ID_NOT_FOUND, None))?;

        let mut outcomes = Vec::new();
        for (topic, indexes) in partitions {
            let count = topics.get(&topic).copied().unwrap_or(0);
            for partition in indexes {
                let error_code = if partition >= 0 && partition < count {
                    committed.remove(&(topic.clone(), partition));
                    ERROR_NONE
                } else {
                    ERROR_UNKNOWN_TOPIC_OR_PARTITION
                };
                outcomes.push(PartitionOutcome {
                    topic: topic.clone(),
                    partition,
                    error_code,
                });
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_producers_are_tracked() {
        let probe = ProducerProbe::default();
        let producer = probe.create("p-1".to_string());
        assert_eq!(probe.created(), 1);
        assert!(!producer.in_transactional_error());

        producer.poison();
        assert!(producer.in_transactional_error());
        producer.close();
        assert!(probe.was_closed("p-1"));
    }

    #[tokio::test]
    async fn test_recording_session_skips_empty_commits() {
        let session = RecordingSession::new(1);
        session.commit().await.unwrap();
        assert!(session.committed_positions("orders", 0).is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_cluster_unknown_group() {
        let cluster = InMemoryCluster::default();
        let mut partitions = BTreeMap::new();
        partitions.insert("orders".to_string(), BTreeSet::from([0]));

        let err = cluster
            .delete_offsets("nobody".to_string(), partitions, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, KafkaError::Protocol { .. }));
    }
}
