//! Transactional producers and the pool that lends them out
//!
//! A [`ProducerPool`] owns a LIFO set of idle [`KafkaProducer`]s, each with
//! its own transaction id. Callers borrow a [`Lease`], run one or more
//! transactions on it, and the lease returns the handle on drop. Handles
//! whose transactional state is broken are closed instead of reused.

pub mod handle;
pub mod pool;

pub use handle::{IdempotentProducer, KafkaProducer, Record, TransactionalHandle};
pub use pool::{Lease, PoolOptions, ProducerPool};
