//! Admin E2E tests
//!
//! TopicAdmin against a live broker:
//! - topic creation and duplicate detection
//! - offset reset with a missing partition (partial application)
//! - consumer group deletion

use kafka_eos::GroupOffsetSelector;

use crate::assertions::{assert_equal, assert_error_mentions};
use crate::common::{commit_offset, committed_offset, TestResult};
use crate::setup::TestContext;

/// Creating a topic twice fails the second time
pub async fn test_create_topic_twice() -> TestResult {
    println!("=== Test: Create Topic Twice ===\n");

    let ctx = TestContext::new()?;
    let topic = ctx.create_topic("admin-create", 3).await?;
    println!("  Created '{}'", topic);

    let again = ctx.admin.create_topic(&topic, 3, 1).await;
    assert_error_mentions("duplicate creation surfaces an error", &again, &topic)?;

    let invalid = ctx.admin.create_topic("bad name!", 1, 1).await;
    assert_error_mentions("illegal name rejected", &invalid, "invalid topic name")?;

    ctx.cleanup().await?;
    println!("\n✅ Create topic twice passed\n");
    Ok(())
}

/// Offsets of partitions {0, 1, 2} reset on a two-partition topic
///
/// The call fails naming partition 2, while 0 and 1 are already deleted.
pub async fn test_reset_offsets_partial_failure() -> TestResult {
    println!("=== Test: Reset Offsets Partial Failure ===\n");

    let ctx = TestContext::new()?;
    let topic = ctx.create_topic("admin-reset", 2).await?;
    let group = ctx.unique_group("admin-reset").await;

    commit_offset(&group, &topic, 0, 0)?;
    commit_offset(&group, &topic, 1, 0)?;
    assert_equal("offset 0 committed", Some(0), committed_offset(&group, &topic, 0)?)?;

    let selector = GroupOffsetSelector::new(group.clone()).partitions(topic.clone(), [0, 1, 2]);
    let result = ctx.admin.reset_group_offsets(&selector).await;
    println!("  Reset result: {:?}", result);
    assert_error_mentions(
        "missing partition named",
        &result,
        &format!("{}/2", topic),
    )?;

    assert_equal("partition 0 reset", None, committed_offset(&group, &topic, 0)?)?;
    assert_equal("partition 1 reset", None, committed_offset(&group, &topic, 1)?)?;

    ctx.cleanup().await?;
    println!("\n✅ Reset offsets partial failure passed\n");
    Ok(())
}

/// An empty group with committed offsets can be deleted, an unknown one cannot
pub async fn test_delete_consumer_group() -> TestResult {
    println!("=== Test: Delete Consumer Group ===\n");

    let ctx = TestContext::new()?;
    let topic = ctx.create_topic("admin-delete-group", 1).await?;
    let group = ctx.unique_group("admin-delete").await;
    commit_offset(&group, &topic, 0, 0)?;

    ctx.admin.delete_consumer_groups(&[group.as_str()]).await?;
    assert_equal("offsets gone with the group", None, committed_offset(&group, &topic, 0)?)?;

    let missing = ctx.unique_group("admin-never-existed").await;
    let result = ctx.admin.delete_consumer_groups(&[missing.as_str()]).await;
    assert_error_mentions("unknown group reported", &result, &missing)?;

    ctx.cleanup().await?;
    println!("\n✅ Delete consumer group passed\n");
    Ok(())
}
