//! Consumer group driver
//!
//! [`GroupConsumer`] owns an rdkafka `StreamConsumer`, turns rebalance
//! callbacks into generations and drives a [`ConsumerGroupHandler`]
//! through them:
//!
//! 1. On assignment a new [`KafkaSession`] is created, `setup` runs, and one
//!    `consume_claim` task is spawned per assigned partition.
//! 2. Fetched messages are routed to their claim over a bounded channel.
//! 3. On revocation the session token fires inside the rebalance callback,
//!    and the callback waits for the claim loops to finish their final
//!    commits before the partitions are given up.
//! 4. Once every claim has returned, `cleanup` runs.
//!
//! The rebalance callback blocks the thread polling the consumer while
//! claims drain, so `consume` needs a multi-threaded tokio runtime. A
//! claim still running when the drain times out can no longer commit.
//! The consumer itself must be created inside a tokio runtime.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rdkafka::client::ClientContext;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::TopicPartitionList;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::{Claim, ConsumerGroupHandler};
use super::message::ConsumerMessage;
use super::session::{GroupSession, KafkaSession};
use crate::config::BrokerConfig;
use crate::kafka::constants::{CLAIM_CHANNEL_CAPACITY, REVOKE_DRAIN_TIMEOUT};
use crate::kafka::log_sink::{default_sink, LogEvent, LogSink};
use crate::kafka::{KafkaError, Result};

/// Partition ownership change reported by the rebalance callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    Assigned(Vec<(String, i32)>),
    Revoked(Vec<(String, i32)>),
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<(String, i32)> {
    tpl.elements()
        .iter()
        .map(|e| (e.topic().to_string(), e.partition()))
        .collect()
}

/// Apply a rebalance event to the current assignment
fn apply_event(assignment: &mut BTreeSet<(String, i32)>, event: RebalanceEvent) {
    match event {
        RebalanceEvent::Assigned(added) => assignment.extend(added),
        RebalanceEvent::Revoked(removed) => {
            for tp in &removed {
                assignment.remove(tp);
            }
        }
    }
}

/// Counts running claim loops so a revoke can wait for them
#[derive(Debug, Default)]
pub(crate) struct ClaimTracker {
    running: Mutex<usize>,
    idle: Condvar,
}

impl ClaimTracker {
    pub(crate) fn enter(self: &Arc<Self>) -> ClaimGuard {
        *self.running.lock() += 1;
        ClaimGuard(Arc::clone(self))
    }

    pub(crate) fn running(&self) -> usize {
        *self.running.lock()
    }

    /// Block until no claim is running; false on timeout
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut running = self.running.lock();
        while *running > 0 {
            if self.idle.wait_until(&mut running, deadline).timed_out() {
                return *running == 0;
            }
        }
        true
    }
}

/// Marks one running claim loop; dropping it signals completion
pub(crate) struct ClaimGuard(Arc<ClaimTracker>);

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let mut running = self.0.running.lock();
        *running = running.saturating_sub(1);
        if *running == 0 {
            self.0.idle.notify_all();
        }
    }
}

struct ActiveGeneration {
    generation: i32,
    token: CancellationToken,
    claims: Arc<ClaimTracker>,
    revoked: Arc<AtomicBool>,
}

/// rdkafka context bridging rebalance callbacks to the driver
pub struct GroupContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
    active: Mutex<Option<ActiveGeneration>>,
    drain_timeout: Duration,
    log: Arc<dyn LogSink>,
}

impl GroupContext {
    fn new(events: mpsc::UnboundedSender<RebalanceEvent>, log: Arc<dyn LogSink>) -> Self {
        Self {
            events,
            active: Mutex::new(None),
            drain_timeout: REVOKE_DRAIN_TIMEOUT,
            log,
        }
    }

    fn activate(
        &self,
        generation: i32,
        token: CancellationToken,
        claims: Arc<ClaimTracker>,
        revoked: Arc<AtomicBool>,
    ) {
        *self.active.lock() = Some(ActiveGeneration {
            generation,
            token,
            claims,
            revoked,
        });
    }

    fn deactivate(&self) {
        self.active.lock().take();
    }

    /// Stop the running generation and wait for its claims to commit
    fn revoke_active(&self) {
        let active = self.active.lock().take();
        let Some(active) = active else {
            return;
        };

        active.token.cancel();
        if !active.claims.wait_idle(self.drain_timeout) {
            // The partitions are about to move; stragglers must not commit
            active.revoked.store(true, Ordering::Release);
            self.log.log(
                LogEvent::warn("rebalance", "claims still running after revoke timeout")
                    .field("generation", active.generation)
                    .field("running", active.claims.running()),
            );
        }
    }

    fn notify(&self, event: RebalanceEvent) {
        // The receiver only goes away with the consumer itself
        let _ = self.events.send(event);
    }
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            debug!(partitions = tpl.count(), "Partitions revoked");
            self.revoke_active();
            self.notify(RebalanceEvent::Revoked(partitions_of(tpl)));
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                debug!(partitions = tpl.count(), "Partitions assigned");
                self.notify(RebalanceEvent::Assigned(partitions_of(tpl)));
            }
            Rebalance::Error(err) => {
                self.log.log(LogEvent::error("rebalance", "rebalance failed").with_error(err));
            }
            Rebalance::Revoke(_) => {}
        }
    }
}

/// Running generation as seen from the driver
struct Generation {
    session: Arc<KafkaSession>,
    feeders: HashMap<(String, i32), mpsc::Sender<ConsumerMessage>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Group member driving a [`ConsumerGroupHandler`]
pub struct GroupConsumer {
    consumer: Arc<StreamConsumer<GroupContext>>,
    group: String,
    events: Mutex<Option<mpsc::UnboundedReceiver<RebalanceEvent>>>,
    log: Arc<dyn LogSink>,
}

impl GroupConsumer {
    /// Create a group member; nothing is joined until [`consume`](Self::consume)
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a tokio runtime, if the
    /// configuration or group name is invalid, or if the client cannot be
    /// created.
    pub fn new<F>(brokers: &str, group: &str, conf: F) -> Result<Self>
    where
        F: FnOnce() -> BrokerConfig,
    {
        Self::with_log_sink(brokers, group, conf, default_sink())
    }

    pub fn with_log_sink<F>(
        brokers: &str,
        group: &str,
        conf: F,
        log: Arc<dyn LogSink>,
    ) -> Result<Self>
    where
        F: FnOnce() -> BrokerConfig,
    {
        let client_config = conf().consumer_client_config(brokers, group)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(KafkaError::InvalidArgument(format!(
                "consumer for group '{}' must be created inside a tokio runtime",
                group
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let context = GroupContext::new(tx, Arc::clone(&log));

        let consumer: StreamConsumer<GroupContext> = client_config
            .create_with_context(context)
            .map_err(|e| KafkaError::client("create consumer", e))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            group: group.to_string(),
            events: Mutex::new(Some(rx)),
            log,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Join the group on `topics` and drive `handler` until `shutdown` fires
    ///
    /// Only one `consume` call may run per consumer at a time.
    pub async fn consume<H>(
        &self,
        topics: &[&str],
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) -> Result<()>
    where
        H: ConsumerGroupHandler + 'static,
    {
        let mut events = self.events.lock().take().ok_or_else(|| {
            KafkaError::InvalidArgument(format!(
                "consumer for group '{}' is already consuming",
                self.group
            ))
        })?;

        self.consumer
            .subscribe(topics)
            .map_err(|e| KafkaError::client("subscribe", e))?;
        info!(group = %self.group, ?topics, "Joined consumer group");

        let result = self
            .run_generations(&mut events, &handler, &shutdown)
            .await;

        self.consumer.unsubscribe();
        *self.events.lock() = Some(events);
        info!(group = %self.group, "Left consumer group");
        result
    }

    async fn run_generations<H>(
        &self,
        events: &mut mpsc::UnboundedReceiver<RebalanceEvent>,
        handler: &Arc<H>,
        shutdown: &CancellationToken,
    ) -> Result<()>
    where
        H: ConsumerGroupHandler + 'static,
    {
        let mut assignment: BTreeSet<(String, i32)> = BTreeSet::new();
        let mut generation_id = 0;
        let mut current: Option<Generation> = None;

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    apply_event(&mut assignment, event);
                    None
                }
                received = self.consumer.recv() => match received {
                    Ok(message) => Some(ConsumerMessage::from(&message)),
                    Err(err) => {
                        self.log.log(
                            LogEvent::warn("consume", "fetch failed")
                                .with_error(&err)
                                .field("group", &self.group),
                        );
                        None
                    }
                },
            };

            // Rebalances served while polling must take effect before the
            // message they may have been delivered with is routed
            let mut changed = message.is_none();
            while let Ok(event) = events.try_recv() {
                apply_event(&mut assignment, event);
                changed = true;
            }

            if changed && Self::assignment_differs(current.as_ref(), &assignment) {
                if let Some(generation) = current.take() {
                    self.finish_generation(generation, handler.as_ref()).await;
                }
                if !assignment.is_empty() {
                    generation_id += 1;
                    current = Some(
                        self.start_generation(generation_id, &assignment, handler, shutdown)
                            .await?,
                    );
                }
            }

            if let (Some(message), Some(generation)) = (message, current.as_mut()) {
                Self::dispatch(generation, message).await;
            }
        }

        if let Some(generation) = current.take() {
            self.finish_generation(generation, handler.as_ref()).await;
        }
        Ok(())
    }

    fn assignment_differs(current: Option<&Generation>, assignment: &BTreeSet<(String, i32)>) -> bool {
        match current {
            Some(generation) => {
                let claimed: BTreeSet<(String, i32)> =
                    generation.session.assignment().iter().cloned().collect();
                claimed != *assignment
            }
            None => !assignment.is_empty(),
        }
    }

    async fn start_generation<H>(
        &self,
        generation_id: i32,
        assignment: &BTreeSet<(String, i32)>,
        handler: &Arc<H>,
        shutdown: &CancellationToken,
    ) -> Result<Generation>
    where
        H: ConsumerGroupHandler + 'static,
    {
        let token = shutdown.child_token();
        let claims = Arc::new(ClaimTracker::default());
        let session = Arc::new(KafkaSession::new(
            Arc::clone(&self.consumer),
            generation_id,
            assignment.iter().cloned().collect(),
            token.clone(),
        ));

        handler.setup(session.as_ref()).await?;
        self.consumer.context().activate(
            generation_id,
            token,
            Arc::clone(&claims),
            session.revocation(),
        );

        let mut feeders = HashMap::with_capacity(assignment.len());
        let mut tasks = Vec::with_capacity(assignment.len());
        for (topic, partition) in assignment {
            let (tx, rx) = mpsc::channel(CLAIM_CHANNEL_CAPACITY);
            feeders.insert((topic.clone(), *partition), tx);

            let claim = Claim::new(topic.clone(), *partition, rx);
            let guard = claims.enter();
            let session = Arc::clone(&session);
            let handler = Arc::clone(handler);
            let log = Arc::clone(&self.log);
            tasks.push(tokio::spawn(async move {
                let topic = claim.topic().to_string();
                let partition = claim.partition();
                if let Err(err) = handler.consume_claim(session.as_ref(), claim).await {
                    log.log(
                        LogEvent::error("consume_claim", "claim loop failed")
                            .with_error(&err)
                            .field("topic", topic)
                            .field("partition", partition),
                    );
                }
                drop(guard);
            }));
        }

        info!(
            group = %self.group,
            generation = generation_id,
            partitions = assignment.len(),
            "Consumer group generation started"
        );

        Ok(Generation {
            session,
            feeders,
            tasks,
        })
    }

    async fn finish_generation<H>(&self, generation: Generation, handler: &H)
    where
        H: ConsumerGroupHandler,
    {
        let Generation {
            session,
            feeders,
            tasks,
        } = generation;

        session.cancellation().cancel();
        drop(feeders);
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Claim task did not complete");
            }
        }
        self.consumer.context().deactivate();

        if let Err(err) = handler.cleanup(session.as_ref()).await {
            self.log.log(
                LogEvent::error("cleanup", "handler cleanup failed")
                    .with_error(&err)
                    .field("generation", session.generation()),
            );
        }
        debug!(group = %self.group, generation = session.generation(), "Generation finished");
    }

    async fn dispatch(generation: &mut Generation, message: ConsumerMessage) {
        let key = (message.topic.clone(), message.partition);
        let Some(feeder) = generation.feeders.get(&key) else {
            // Not claimed in this generation; the owner re-fetches it from the committed position
            return;
        };
        if feeder.send(message).await.is_err() {
            // Claim loop already returned
            generation.feeders.remove(&key);
        }
    }
}

impl fmt::Debug for GroupConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupConsumer")
            .field("group", &self.group)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp(topic: &str, partition: i32) -> (String, i32) {
        (topic.to_string(), partition)
    }

    #[test]
    fn test_apply_eager_rebalance() {
        let mut assignment = BTreeSet::new();
        apply_event(
            &mut assignment,
            RebalanceEvent::Assigned(vec![tp("orders", 0), tp("orders", 1)]),
        );
        apply_event(
            &mut assignment,
            RebalanceEvent::Revoked(vec![tp("orders", 0), tp("orders", 1)]),
        );
        assert!(assignment.is_empty());

        apply_event(&mut assignment, RebalanceEvent::Assigned(vec![tp("orders", 1)]));
        assert_eq!(assignment.into_iter().collect::<Vec<_>>(), vec![tp("orders", 1)]);
    }

    #[test]
    fn test_apply_revoke_of_unknown_partition() {
        let mut assignment: BTreeSet<_> = [tp("orders", 0)].into_iter().collect();
        apply_event(&mut assignment, RebalanceEvent::Revoked(vec![tp("payments", 4)]));
        assert_eq!(assignment.into_iter().collect::<Vec<_>>(), vec![tp("orders", 0)]);
    }

    #[test]
    fn test_tracker_idle_without_claims() {
        let tracker = Arc::new(ClaimTracker::default());
        assert!(tracker.wait_idle(Duration::from_millis(1)));
    }

    #[test]
    fn test_tracker_times_out_while_claim_runs() {
        let tracker = Arc::new(ClaimTracker::default());
        let _guard = tracker.enter();
        assert_eq!(tracker.running(), 1);
        assert!(!tracker.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_tracker_wakes_when_claims_finish() {
        let tracker = Arc::new(ClaimTracker::default());
        let guard = tracker.enter();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            std::thread::spawn(move || tracker.wait_idle(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(guard);

        assert!(waiter.join().unwrap());
        assert_eq!(tracker.running(), 0);
    }

    #[test]
    fn test_revoke_cancels_active_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let context = GroupContext::new(tx, Arc::new(crate::kafka::log_sink::NullSink));
        let token = CancellationToken::new();
        let claims = Arc::new(ClaimTracker::default());

        let revoked = Arc::new(AtomicBool::new(false));

        context.activate(1, token.clone(), claims, Arc::clone(&revoked));
        context.revoke_active();
        context.notify(RebalanceEvent::Revoked(vec![tp("orders", 0)]));

        assert!(token.is_cancelled());
        // Every claim drained in time, so their commits stand
        assert!(!revoked.load(Ordering::Acquire));
        assert!(context.active.lock().is_none());
        assert_eq!(
            rx.try_recv().unwrap(),
            RebalanceEvent::Revoked(vec![tp("orders", 0)])
        );
    }

    #[test]
    fn test_revoke_logs_when_claims_hang() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = Arc::new(crate::testing::RecordingSink::default());
        let mut context = GroupContext::new(tx, sink.clone());
        context.drain_timeout = Duration::from_millis(5);

        let claims = Arc::new(ClaimTracker::default());
        let _stuck = claims.enter();
        let revoked = Arc::new(AtomicBool::new(false));
        context.activate(3, CancellationToken::new(), claims, Arc::clone(&revoked));
        context.revoke_active();

        let events = sink.events_for("rebalance");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get("generation"), Some("3"));
        assert!(revoked.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_revoked_session_drops_commits() {
        let consumer =
            GroupConsumer::new("localhost:1", "billing", BrokerConfig::exactly_once_consumer)
                .unwrap();
        let session = KafkaSession::new(
            Arc::clone(&consumer.consumer),
            2,
            vec![tp("orders", 0)],
            CancellationToken::new(),
        );
        session.mark_message(&ConsumerMessage::new("orders", 0, 41, "late"));
        session.revocation().store(true, Ordering::Release);

        // No broker is reachable, so only the revocation lets this succeed
        tokio::time::timeout(Duration::from_secs(5), session.commit())
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_revoked());
    }

    #[test]
    fn test_new_rejects_empty_group() {
        let result = GroupConsumer::new("localhost:9092", "", BrokerConfig::exactly_once_consumer);
        assert!(matches!(result, Err(KafkaError::InvalidArgument(_))));
    }

    #[test]
    fn test_new_outside_runtime_is_an_error() {
        let result = GroupConsumer::new("localhost:1", "billing", BrokerConfig::exactly_once_consumer);
        assert!(matches!(result, Err(KafkaError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_new_creates_client_without_broker() {
        let consumer =
            GroupConsumer::new("localhost:1", "billing", BrokerConfig::exactly_once_consumer)
                .unwrap();
        assert_eq!(consumer.group(), "billing");
    }
}
