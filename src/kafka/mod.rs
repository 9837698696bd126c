// Kafka client-side building blocks
//
// - producer: transactional producer handles and the pool lending them
// - consumer: consumer group driver and the exactly-once claim loop
// - admin: topic creation, group offset reset, group deletion
//
// All three sit on top of librdkafka (rdkafka crate). The only requests
// built by hand are FindCoordinator and OffsetDelete in admin::wire, which
// librdkafka does not expose.

pub mod admin;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod log_sink;
pub mod producer;

// Re-export commonly used types for convenience
pub use admin::{ClusterAdmin, GroupOffsetSelector, TopicAdmin};
pub use consumer::{
    Claim, ConsumerGroupHandler, ConsumerMessage, ExactlyOnceHandler, GroupConsumer, GroupSession,
};
pub use error::{KafkaError, Result};
pub use log_sink::{LogEvent, LogLevel, LogSink, NullSink, TracingSink};
pub use producer::{
    IdempotentProducer, KafkaProducer, Lease, PoolOptions, ProducerPool, Record,
    TransactionalHandle,
};
