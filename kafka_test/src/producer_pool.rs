//! Producer pool E2E tests
//!
//! Transactional producers lent out by the pool against a live broker:
//! - sequential transactions on one reused handle
//! - aborted transactions stay invisible to read-committed consumers
//! - concurrent borrowers get distinct transaction ids
//! - the plain idempotent producer delivers without transactions

use std::collections::HashSet;
use std::sync::Arc;

use kafka_eos::kafka::producer::{IdempotentProducer, Record, TransactionalHandle};
use kafka_eos::{BrokerConfig, ProducerPool};

use crate::assertions::assert_equal;
use crate::common::{count_committed_messages, get_bootstrap_servers, TestResult, DRAIN_TIMEOUT};
use crate::setup::TestContext;

/// 100 begin/send/commit cycles through a pool sized for one handle
///
/// Every cycle must succeed and a read-committed consumer must see
/// exactly 100 messages.
pub async fn test_pool_transactional_cycles() -> TestResult {
    println!("=== Test: Pool Transactional Cycles ===\n");

    let ctx = TestContext::new()?;
    let topic = ctx.create_topic("pool-cycles", 1).await?;
    let group = ctx.unique_group("pool-cycles-verify").await;

    let pool = ProducerPool::new(&get_bootstrap_servers(), 1, BrokerConfig::transactional_producer)?;

    println!("Running 100 transactions on '{}'...", topic);
    for i in 0..100 {
        let lease = pool.borrow().await?;
        let payload = format!("txn-{}", i);
        lease.begin_transaction()?;
        lease
            .send(Record::new(&topic, payload.as_bytes()).with_key(b"cycle"))
            .await?;
        lease.commit_transaction()?;
    }
    println!("  100 transactions committed\n");

    // One handle served every cycle
    assert_equal("handles created", 1, pool.live_len())?;

    let visible = count_committed_messages(&topic, &group, DRAIN_TIMEOUT).await?;
    println!("Read-committed consumer saw {} messages", visible);
    assert_equal("messages visible to read_committed", 100, visible)?;

    pool.clear();
    ctx.cleanup().await?;
    println!("\n✅ Pool transactional cycles passed\n");
    Ok(())
}

/// An aborted transaction leaves nothing visible and the handle reusable
pub async fn test_pool_abort_is_invisible() -> TestResult {
    println!("=== Test: Pool Abort Is Invisible ===\n");

    let ctx = TestContext::new()?;
    let topic = ctx.create_topic("pool-abort", 1).await?;
    let group = ctx.unique_group("pool-abort-verify").await;

    let pool = ProducerPool::new(&get_bootstrap_servers(), 1, BrokerConfig::transactional_producer)?;

    let lease = pool.borrow().await?;
    let id = lease.transactional_id().to_string();
    lease.begin_transaction()?;
    lease.send(Record::new(&topic, b"aborted")).await?;
    lease.abort_transaction()?;
    assert_equal("healthy after abort", false, lease.in_transactional_error())?;
    drop(lease);

    let lease = pool.borrow().await?;
    assert_equal("handle reused after abort", id, lease.transactional_id().to_string())?;
    lease
        .send_in_transaction(&[Record::new(&topic, b"committed")])
        .await?;
    drop(lease);

    let visible = count_committed_messages(&topic, &group, DRAIN_TIMEOUT).await?;
    assert_equal("only the committed message is visible", 1, visible)?;

    pool.clear();
    ctx.cleanup().await?;
    println!("\n✅ Pool abort passed\n");
    Ok(())
}

/// Concurrent borrowers each initialize their own transaction id
pub async fn test_pool_concurrent_borrowers() -> TestResult {
    println!("=== Test: Pool Concurrent Borrowers ===\n");

    let ctx = TestContext::new()?;
    let topic = ctx.create_topic("pool-concurrent", 3).await?;
    let group = ctx.unique_group("pool-concurrent-verify").await;

    let pool = Arc::new(ProducerPool::new(
        &get_bootstrap_servers(),
        4,
        BrokerConfig::transactional_producer,
    )?);

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let pool = Arc::clone(&pool);
        let topic = topic.clone();
        tasks.push(tokio::spawn(async move {
            let lease = pool.borrow().await?;
            let id = lease.transactional_id().to_string();
            let payload = format!("worker-{}", worker);
            lease
                .send_in_transaction(&[Record::new(&topic, payload.as_bytes())])
                .await?;
            Ok::<_, kafka_eos::KafkaError>(id)
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await??);
    }
    println!("  {} workers used {} distinct transaction ids", 4, ids.len());
    assert_equal("distinct ids per concurrent lease", pool.live_len(), ids.len())?;

    let visible = count_committed_messages(&topic, &group, DRAIN_TIMEOUT).await?;
    assert_equal("messages visible to read_committed", 4, visible)?;

    pool.clear();
    ctx.cleanup().await?;
    println!("\n✅ Pool concurrent borrowers passed\n");
    Ok(())
}

/// Idempotent producer built from the non-transactional preset
pub async fn test_idempotent_producer_delivers() -> TestResult {
    println!("=== Test: Idempotent Producer Delivers ===\n");

    let ctx = TestContext::new()?;
    let topic = ctx.create_topic("idempotent-plain", 2).await?;
    let group = ctx.unique_group("idempotent-plain-verify").await;

    let producer =
        IdempotentProducer::connect(&get_bootstrap_servers(), &BrokerConfig::idempotent_producer())?;
    for i in 0..10 {
        let payload = format!("plain-{}", i);
        producer.send(Record::new(&topic, payload.as_bytes())).await?;
    }
    producer.close();

    let visible = count_committed_messages(&topic, &group, DRAIN_TIMEOUT).await?;
    assert_equal("messages delivered without transactions", 10, visible)?;

    ctx.cleanup().await?;
    println!("\n✅ Idempotent producer passed\n");
    Ok(())
}
