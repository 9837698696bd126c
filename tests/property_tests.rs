// Property-based tests using proptest
//
// - transaction ids handed out by a pool never repeat, however many
//   handles are created and evicted
// - committed positions of a claim never move backwards and always point
//   at a message that was not yet processed successfully

mod helpers;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use helpers::{claim_of, CloseLog, MemorySession, TestProducer};
use kafka_eos::kafka::consumer::{ConsumerGroupHandler, ConsumerMessage, ExactlyOnceHandler};
use kafka_eos::kafka::producer::{ProducerPool, TransactionalHandle};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn test_thousand_handles_have_unique_ids() {
    let closed = CloseLog::default();
    let factory_log = closed.clone();
    let pool = ProducerPool::with_factory("uniq", 0, move |id| {
        Ok(TestProducer::new(id, factory_log.clone()))
    });

    let ids = runtime().block_on(async {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            // Evicting every handle forces a fresh one on the next borrow
            let lease = pool.borrow().await.unwrap();
            assert!(ids.insert(lease.transactional_id().to_string()));
            lease.break_transaction();
        }
        ids
    });

    assert_eq!(ids.len(), 1000);
    assert_eq!(closed.len(), 1000);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_ids_unique_across_interleavings(ops in prop::collection::vec(0u8..3, 1..200)) {
        // Property: whatever the mix of borrow/return/evict, no id is created twice
        let closed = CloseLog::default();
        let factory_log = closed.clone();
        let created: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let factory_created = Arc::clone(&created);
        let pool = ProducerPool::with_factory("prop", 2, move |id: String| {
            factory_created.lock().unwrap().push(id.clone());
            Ok(TestProducer::new(id, factory_log.clone()))
        });

        runtime().block_on(async {
            let mut held = Vec::new();
            for op in &ops {
                match op {
                    0 => held.push(pool.borrow().await.unwrap().detach()),
                    1 => {
                        if let Some(handle) = held.pop() {
                            pool.release_handle(handle);
                        }
                    }
                    _ => {
                        if let Some(handle) = held.pop() {
                            handle.break_transaction();
                            pool.release_handle(handle);
                        }
                    }
                }
            }
            for handle in held {
                pool.release_handle(handle);
            }
        });

        let created = created.lock().unwrap();
        let unique: HashSet<&String> = created.iter().collect();
        prop_assert_eq!(unique.len(), created.len());
        prop_assert_eq!(pool.idle_len() + closed.len(), created.len());
    }

    #[test]
    fn test_committed_positions_are_monotonic(
        count in 1usize..40,
        failures in prop::collection::btree_set(0usize..40, 0..5),
    ) {
        // Property: with single transient failures at arbitrary offsets and a
        // redelivering broker, commits never go backwards
        let offsets: Vec<i64> = (0..count as i64).collect();
        let mut delivered = Vec::new();
        for (i, offset) in offsets.iter().enumerate() {
            delivered.push(*offset);
            if failures.contains(&i) {
                // Redelivery of the failed offset after the rewind
                delivered.push(*offset);
            }
        }

        let fail_at: HashSet<i64> = failures
            .iter()
            .filter(|i| **i < count)
            .map(|i| *i as i64)
            .collect();
        let seen_failure: Arc<Mutex<HashSet<i64>>> = Arc::new(Mutex::new(HashSet::new()));
        let tracker = Arc::clone(&seen_failure);
        let handler = ExactlyOnceHandler::new(move |message: &ConsumerMessage| {
            if fail_at.contains(&message.offset) && tracker.lock().unwrap().insert(message.offset) {
                return Err("transient".into());
            }
            Ok(())
        });
        let session = MemorySession::default();

        runtime().block_on(async {
            handler
                .consume_claim(&session, claim_of("orders", 0, &delivered))
                .await
                .unwrap();
        });

        let committed = session.committed("orders", 0);
        prop_assert_eq!(committed.last().copied(), Some(count as i64));
        for pair in committed.windows(2) {
            // A failure re-commits the failed offset, which is where the previous commit already was
            prop_assert!(pair[1] >= pair[0]);
        }
        prop_assert_eq!(session.seek_count(), seen_failure.lock().unwrap().len());
    }
}

#[test]
fn test_failure_never_commits_past_failed_offset() {
    let failed = AtomicBool::new(false);
    let handler = ExactlyOnceHandler::new(move |message: &ConsumerMessage| {
        if message.offset == 2 && !failed.swap(true, Ordering::SeqCst) {
            return Err("first attempt fails".into());
        }
        Ok(())
    });
    let session = MemorySession::default();

    runtime().block_on(async {
        handler
            .consume_claim(&session, claim_of("orders", 0, &[0, 1, 2, 3, 2, 3]))
            .await
            .unwrap();
    });

    // 3 was buffered behind the failed 2 and is skipped until 2 comes back
    assert_eq!(session.committed("orders", 0), vec![1, 2, 2, 3, 4]);
}
