//! Consumer group handlers and the exactly-once claim loop
//!
//! A [`ConsumerGroupHandler`] is driven by the group consumer through one
//! `setup`, one `consume_claim` per claimed partition, and one `cleanup`
//! per generation. [`ExactlyOnceHandler`] is the handler the rest of this
//! crate is built around:
//!
//! - a processed message is marked and committed synchronously before the
//!   next one is taken,
//! - a failed message is never committed past: the partition position is
//!   reset to the failed offset, the partition is re-fetched from there, and
//!   already buffered later messages are skipped until the re-fetch starts,
//! - the loop stops as soon as the session is cancelled, after one final
//!   commit of whatever is staged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::message::ConsumerMessage;
use super::readiness::Readiness;
use super::session::GroupSession;
use crate::kafka::log_sink::{default_sink, LogEvent, LogSink};
use crate::kafka::Result;

/// Error type returned by per-message processing functions
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Messages of one partition for one generation, in offset order
#[derive(Debug)]
pub struct Claim {
    topic: String,
    partition: i32,
    messages: mpsc::Receiver<ConsumerMessage>,
}

impl Claim {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        messages: mpsc::Receiver<ConsumerMessage>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            messages,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Next message, or `None` once the generation stops feeding this claim
    pub async fn recv(&mut self) -> Option<ConsumerMessage> {
        self.messages.recv().await
    }
}

/// Callbacks driven by the group consumer for every generation
#[async_trait]
pub trait ConsumerGroupHandler: Send + Sync {
    /// Runs once before any claim of a new generation starts
    async fn setup(&self, _session: &dyn GroupSession) -> Result<()> {
        Ok(())
    }

    /// Runs once per claimed partition, concurrently with other claims
    ///
    /// Must return promptly once `session.cancellation()` fires.
    async fn consume_claim(&self, session: &dyn GroupSession, claim: Claim) -> Result<()>;

    /// Runs once after every claim of the generation has returned
    async fn cleanup(&self, _session: &dyn GroupSession) -> Result<()> {
        Ok(())
    }
}

/// Exactly-once claim loop around a per-message function
pub struct ExactlyOnceHandler<F> {
    process: F,
    readiness: Readiness,
    redelivery_delay: Option<Duration>,
    log: Arc<dyn LogSink>,
}

impl<F> ExactlyOnceHandler<F>
where
    F: Fn(&ConsumerMessage) -> std::result::Result<(), HandlerError> + Send + Sync,
{
    pub fn new(process: F) -> Self {
        Self {
            process,
            readiness: Readiness::new(),
            redelivery_delay: None,
            log: default_sink(),
        }
    }

    /// Pause before a failed message is processed again
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    /// Signal fired by `setup` for every new generation
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// Reposition the partition; true if it has to be retried
    async fn seek_failed(
        &self,
        session: &dyn GroupSession,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> bool {
        match session.seek(topic, partition, offset).await {
            Ok(()) => false,
            Err(err) => {
                self.log.log(
                    LogEvent::warn("seek", "failed to rewind partition")
                        .with_error(&err)
                        .field("topic", topic)
                        .field("partition", partition)
                        .field("offset", offset),
                );
                true
            }
        }
    }

    async fn commit(&self, session: &dyn GroupSession, topic: &str, partition: i32) {
        if let Err(err) = session.commit().await {
            self.log.log(
                LogEvent::error("commit", "synchronous offset commit failed")
                    .with_error(&err)
                    .field("topic", topic)
                    .field("partition", partition)
                    .field("generation", session.generation()),
            );
        }
    }
}

/// Tracks the re-fetch of a partition after a failed message
///
/// Messages fetched before the seek arrive in increasing offset order
/// after the failed one. The re-fetch restarts at the failed offset, or
/// later if that offset was removed by retention, so the first message
/// that does not continue the increasing run belongs to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rewind {
    target: i64,
    highest: i64,
}

impl Rewind {
    fn new(target: i64) -> Self {
        Self {
            target,
            highest: target,
        }
    }

    /// True if processing resumes at `offset`; otherwise it is skipped
    fn resumes_at(&mut self, offset: i64) -> bool {
        if offset == self.target || (offset > self.target && offset <= self.highest) {
            return true;
        }
        self.highest = self.highest.max(offset);
        false
    }
}

#[async_trait]
impl<F> ConsumerGroupHandler for ExactlyOnceHandler<F>
where
    F: Fn(&ConsumerMessage) -> std::result::Result<(), HandlerError> + Send + Sync,
{
    async fn setup(&self, session: &dyn GroupSession) -> Result<()> {
        if self.readiness.mark_ready(session.generation()) {
            info!(
                generation = session.generation(),
                partitions = session.assignment().len(),
                "Consumer group generation ready"
            );
        }
        Ok(())
    }

    async fn consume_claim(&self, session: &dyn GroupSession, mut claim: Claim) -> Result<()> {
        let token = session.cancellation();
        let topic = claim.topic().to_string();
        let partition = claim.partition();

        // Offset being redelivered after a failure, and the highest offset
        // skipped while waiting for it
        let mut rewind: Option<Rewind> = None;
        let mut seek_pending = false;

        loop {
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = claim.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            if let Some(pending) = rewind.as_mut() {
                if !pending.resumes_at(message.offset) {
                    if seek_pending {
                        seek_pending = self
                            .seek_failed(session, &topic, partition, pending.target)
                            .await;
                    }
                    continue;
                }
                rewind = None;
            }

            match (self.process)(&message) {
                Ok(()) => session.mark_message(&message),
                Err(err) => {
                    self.log.log(
                        LogEvent::error("handle", "message handler failed, redelivering")
                            .with_error(&err)
                            .field("topic", &message.topic)
                            .field("partition", message.partition)
                            .field("offset", message.offset),
                    );
                    session.reset_offset(&message.topic, message.partition, message.offset);
                    rewind = Some(Rewind::new(message.offset));
                    seek_pending = self
                        .seek_failed(session, &message.topic, message.partition, message.offset)
                        .await;
                }
            }

            self.commit(session, &topic, partition).await;

            if let (Some(_), Some(delay)) = (rewind.as_ref(), self.redelivery_delay) {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.commit(session, &topic, partition).await;
        debug!(topic = %topic, partition, "Claim finished");
        Ok(())
    }

    async fn cleanup(&self, session: &dyn GroupSession) -> Result<()> {
        self.readiness.reset();
        debug!(generation = session.generation(), "Consumer group generation ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_claim, RecordingSession, RecordingSink};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn collect_into(
        seen: Arc<Mutex<Vec<i64>>>,
    ) -> impl Fn(&ConsumerMessage) -> std::result::Result<(), HandlerError> + Send + Sync {
        move |message| {
            seen.lock().unwrap().push(message.offset);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commits_after_every_message() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = ExactlyOnceHandler::new(collect_into(seen.clone()));
        let session = RecordingSession::new(1);

        let claim = scripted_claim("orders", 0, &[10, 11, 12]);
        handler.consume_claim(&session, claim).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![10, 11, 12]);
        assert_eq!(session.committed_positions("orders", 0), vec![11, 12, 13]);
    }

    #[tokio::test]
    async fn test_failed_message_is_redelivered() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let failed_once = AtomicBool::new(false);
        let recorder = seen.clone();
        let handler = ExactlyOnceHandler::new(move |message: &ConsumerMessage| {
            recorder.lock().unwrap().push(message.offset);
            if message.offset == 11 && !failed_once.swap(true, Ordering::SeqCst) {
                return Err("transient failure".into());
            }
            Ok(())
        });
        let session = RecordingSession::new(1);

        // 12 was already buffered when 11 failed; the rewind redelivers 11, 12
        let claim = scripted_claim("orders", 0, &[10, 11, 12, 11, 12]);
        handler.consume_claim(&session, claim).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![10, 11, 11, 12]);
        assert_eq!(session.committed_positions("orders", 0), vec![11, 11, 12, 13]);
        assert_eq!(session.seeks(), vec![("orders".to_string(), 0, 11)]);
    }

    #[tokio::test]
    async fn test_failure_is_reported_to_log_sink() {
        let sink = Arc::new(RecordingSink::default());
        let handler =
            ExactlyOnceHandler::new(|_: &ConsumerMessage| Err("bad payload".into()))
                .with_log_sink(sink.clone());
        let session = RecordingSession::new(1);

        handler
            .consume_claim(&session, scripted_claim("orders", 3, &[7]))
            .await
            .unwrap();

        let events = sink.events_for("handle");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get("offset"), Some("7"));
        assert_eq!(events[0].error.as_deref(), Some("bad payload"));
        assert_eq!(session.committed_positions("orders", 3), vec![7]);
    }

    #[tokio::test]
    async fn test_commit_failure_is_logged_and_retried() {
        let sink = Arc::new(RecordingSink::default());
        let handler =
            ExactlyOnceHandler::new(|_: &ConsumerMessage| Ok(())).with_log_sink(sink.clone());
        let session = RecordingSession::new(1);
        session.fail_next_commits(1);

        handler
            .consume_claim(&session, scripted_claim("orders", 0, &[0, 1]))
            .await
            .unwrap();

        assert_eq!(sink.count_operation("commit"), 1);
        // Position 1 never went out on its own; the next commit carries 2
        assert_eq!(session.committed_positions("orders", 0), vec![2]);
    }

    #[tokio::test]
    async fn test_stops_on_cancellation() {
        let session = RecordingSession::new(1);
        let cancel = session.cancellation().clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        // Cancels the generation while later messages are still queued
        let handler = ExactlyOnceHandler::new(move |message: &ConsumerMessage| {
            recorder.lock().unwrap().push(message.offset);
            cancel.cancel();
            Ok(())
        });

        let (tx, rx) = mpsc::channel(4);
        for offset in 0..3 {
            tx.send(ConsumerMessage::new("orders", 0, offset, "a")).await.unwrap();
        }

        tokio::time::timeout(
            Duration::from_secs(5),
            handler.consume_claim(&session, Claim::new("orders", 0, rx)),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(session.committed_positions("orders", 0), vec![1]);
        drop(tx);
    }

    #[tokio::test]
    async fn test_resyncs_when_failed_offset_is_gone() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let failed_once = AtomicBool::new(false);
        let recorder = seen.clone();
        let handler = ExactlyOnceHandler::new(move |message: &ConsumerMessage| {
            recorder.lock().unwrap().push(message.offset);
            if message.offset == 11 && !failed_once.swap(true, Ordering::SeqCst) {
                return Err("transient failure".into());
            }
            Ok(())
        });
        let session = RecordingSession::new(1);

        // 12 and 13 were buffered; 11 expired before the re-fetch, which starts at 12
        let claim = scripted_claim("orders", 0, &[10, 11, 12, 13, 12, 13]);
        handler.consume_claim(&session, claim).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![10, 11, 12, 13]);
        assert_eq!(session.committed_positions("orders", 0), vec![11, 11, 13, 14]);
    }

    #[test]
    fn test_rewind_skips_increasing_run() {
        let mut rewind = Rewind::new(11);
        assert!(!rewind.resumes_at(12));
        assert!(!rewind.resumes_at(14));
        assert!(!rewind.resumes_at(9));
        assert!(rewind.resumes_at(13));

        assert!(Rewind::new(11).resumes_at(11));
    }

    #[tokio::test]
    async fn test_redelivery_delay_respects_cancellation() {
        let handler = ExactlyOnceHandler::new(|_: &ConsumerMessage| Err("always".into()))
            .with_redelivery_delay(Duration::from_secs(3600));
        let session = RecordingSession::new(1);
        let (tx, rx) = mpsc::channel(4);
        tx.send(ConsumerMessage::new("orders", 0, 5, "a")).await.unwrap();

        let cancel = session.cancellation().clone();
        let run = handler.consume_claim(&session, Claim::new("orders", 0, rx));
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        };

        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(run, stop)
        })
        .await
        .unwrap();
        result.unwrap();
        assert_eq!(session.committed_positions("orders", 0), vec![5]);
        drop(tx);
    }

    #[tokio::test]
    async fn test_setup_and_cleanup_drive_readiness() {
        let handler = ExactlyOnceHandler::new(|_: &ConsumerMessage| Ok(()));
        let readiness = handler.readiness();

        handler.setup(&RecordingSession::new(4)).await.unwrap();
        assert_eq!(readiness.current(), Some(4));

        handler.cleanup(&RecordingSession::new(4)).await.unwrap();
        assert!(!readiness.is_ready());

        handler.setup(&RecordingSession::new(5)).await.unwrap();
        assert_eq!(readiness.wait_ready().await, 5);
    }
}
