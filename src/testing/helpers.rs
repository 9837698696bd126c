//! Test helper functions
//!
//! Utility functions for creating test fixtures

use tokio::sync::mpsc;

use super::mocks::FakeProducer;
use crate::kafka::consumer::{Claim, ConsumerMessage};
use crate::kafka::{KafkaError, Result};

/// Creates a claim that yields one message per offset, then ends
///
/// The sender is dropped before returning, so the claim loop sees the
/// channel close after the last message.
///
/// # Example
/// ```ignore
/// let claim = scripted_claim("orders", 0, &[10, 11, 12]);
/// handler.consume_claim(&session, claim).await?;
/// ```
pub fn scripted_claim(topic: &str, partition: i32, offsets: &[i64]) -> Claim {
    let (tx, rx) = mpsc::channel(offsets.len().max(1));
    for offset in offsets {
        let message = ConsumerMessage::new(topic, partition, *offset, format!("m{}", offset));
        tx.try_send(message)
            .expect("channel sized for every scripted message");
    }
    drop(tx);
    Claim::new(topic, partition, rx)
}

/// A producer factory that never succeeds
pub fn failing_factory() -> impl Fn(String) -> Result<FakeProducer> + Send + Sync + 'static {
    |id| {
        Err(KafkaError::Coordinator(format!(
            "cannot create producer '{}': broker unreachable",
            id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_claim_yields_offsets_then_closes() {
        let mut claim = scripted_claim("orders", 2, &[4, 5]);
        assert_eq!(claim.partition(), 2);
        assert_eq!(claim.recv().await.map(|m| m.offset), Some(4));
        assert_eq!(claim.recv().await.map(|m| m.offset), Some(5));
        assert!(claim.recv().await.is_none());
    }

    #[test]
    fn test_failing_factory_errors() {
        let factory = failing_factory();
        assert!(factory("p-1".to_string()).is_err());
    }
}
