//! Consumer group E2E tests
//!
//! The exactly-once handler driven by a real group membership:
//! - every produced message is processed once and committed
//! - a failing message is redelivered and the commit never skips it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kafka_eos::kafka::consumer::ConsumerMessage;
use kafka_eos::kafka::producer::Record;
use kafka_eos::{BrokerConfig, ExactlyOnceHandler, GroupConsumer, ProducerPool};
use tokio_util::sync::CancellationToken;

use crate::assertions::assert_equal;
use crate::common::{committed_offset, get_bootstrap_servers, TestResult, GROUP_JOIN_TIMEOUT};
use crate::setup::TestContext;

async fn produce_committed(topic: &str, count: usize) -> TestResult {
    let pool = ProducerPool::new(&get_bootstrap_servers(), 1, BrokerConfig::transactional_producer)?;
    let lease = pool.borrow().await?;
    let payloads: Vec<String> = (0..count).map(|i| format!("msg-{}", i)).collect();
    let records: Vec<Record<'_>> = payloads
        .iter()
        .map(|p| Record::new(topic, p.as_bytes()))
        .collect();
    lease.send_in_transaction(&records).await?;
    Ok(())
}

/// Wait until `seen` holds `expected` entries or the join timeout passes
async fn wait_for(seen: &Arc<Mutex<Vec<i64>>>, expected: usize) {
    let deadline = tokio::time::Instant::now() + GROUP_JOIN_TIMEOUT;
    while seen.lock().unwrap().len() < expected && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Every message of a committed transaction is processed and its offset committed
pub async fn test_exactly_once_consume() -> TestResult {
    println!("=== Test: Exactly-Once Consume ===\n");

    let ctx = TestContext::new()?;
    let topic = ctx.create_topic("eos-consume", 1).await?;
    let group = ctx.unique_group("eos-consume").await;
    produce_committed(&topic, 10).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let handler = Arc::new(ExactlyOnceHandler::new(move |message: &ConsumerMessage| {
        recorder.lock().unwrap().push(message.offset);
        Ok(())
    }));
    let readiness = handler.readiness();

    let consumer = Arc::new(GroupConsumer::new(
        &get_bootstrap_servers(),
        &group,
        BrokerConfig::exactly_once_consumer,
    )?);
    let shutdown = CancellationToken::new();

    let run = {
        let consumer = Arc::clone(&consumer);
        let topic = topic.clone();
        let handler = Arc::clone(&handler);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.consume(&[topic.as_str()], handler, shutdown).await })
    };

    let generation = tokio::time::timeout(GROUP_JOIN_TIMEOUT, readiness.wait_ready()).await?;
    println!("  Joined group '{}' in generation {}", group, generation);

    wait_for(&seen, 10).await;
    shutdown.cancel();
    run.await??;

    let processed = seen.lock().unwrap().clone();
    println!("  Processed offsets: {:?}", processed);
    assert_equal("each message processed once", (0..10).collect::<Vec<i64>>(), processed)?;
    let committed = committed_offset(&group, &topic, 0)?;
    assert_equal("committed position", Some(10), committed)?;

    ctx.cleanup().await?;
    println!("\n✅ Exactly-once consume passed\n");
    Ok(())
}

/// A message failing once is processed again before anything after it
pub async fn test_failed_message_redelivered() -> TestResult {
    println!("=== Test: Failed Message Redelivered ===\n");

    let ctx = TestContext::new()?;
    let topic = ctx.create_topic("eos-redeliver", 1).await?;
    let group = ctx.unique_group("eos-redeliver").await;
    produce_committed(&topic, 5).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let failed_once = AtomicBool::new(false);
    let handler = Arc::new(ExactlyOnceHandler::new(move |message: &ConsumerMessage| {
        recorder.lock().unwrap().push(message.offset);
        if message.offset == 2 && !failed_once.swap(true, Ordering::SeqCst) {
            return Err("simulated processing failure".into());
        }
        Ok(())
    }));

    let consumer = Arc::new(GroupConsumer::new(
        &get_bootstrap_servers(),
        &group,
        BrokerConfig::exactly_once_consumer,
    )?);
    let shutdown = CancellationToken::new();

    let run = {
        let consumer = Arc::clone(&consumer);
        let topic = topic.clone();
        let handler = Arc::clone(&handler);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.consume(&[topic.as_str()], handler, shutdown).await })
    };

    wait_for(&seen, 6).await;
    shutdown.cancel();
    run.await??;

    let processed = seen.lock().unwrap().clone();
    println!("  Processed offsets: {:?}", processed);
    assert_equal("failed offset redelivered in order", vec![0, 1, 2, 2, 3, 4], processed)?;
    let committed = committed_offset(&group, &topic, 0)?;
    assert_equal("committed past every message", Some(5), committed)?;

    ctx.cleanup().await?;
    println!("\n✅ Failed message redelivery passed\n");
    Ok(())
}
