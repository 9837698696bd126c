//! Exactly-once building blocks for Kafka applications
//!
//! - [`ProducerPool`]: a pool of transactional producers, each with a unique
//!   transaction id, lent out one owner at a time
//! - [`ExactlyOnceHandler`] driven by [`GroupConsumer`]: a per-partition
//!   claim loop committing consumed offsets after every processed message
//! - [`TopicAdmin`]: topic creation, group offset reset and group deletion
//!
//! Configuration goes through [`BrokerConfig`] and its presets; failures
//! are reported as [`KafkaError`] and, where the caller does not see them
//! directly, to an injected [`LogSink`](kafka::LogSink).

pub mod config;
pub mod kafka;
pub mod telemetry;

// Test utilities (only compiled in test builds)
#[cfg(test)]
pub mod testing;

pub use config::{BrokerConfig, BrokerConfigBuilder};
pub use kafka::{
    ConsumerGroupHandler, ConsumerMessage, ExactlyOnceHandler, GroupConsumer, GroupOffsetSelector,
    GroupSession, KafkaError, KafkaProducer, Lease, ProducerPool, Result, TopicAdmin,
};
