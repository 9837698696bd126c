//! Consumer group membership and the exactly-once claim loop
//!
//! [`GroupConsumer`] joins a group and turns every rebalance generation into
//! a [`GroupSession`] plus one [`Claim`] per assigned partition.
//! [`ExactlyOnceHandler`] runs the per-partition loop: process, mark,
//! commit, and rewind a partition whose message failed.

pub mod group;
pub mod handler;
pub mod message;
pub mod readiness;
pub mod session;

pub use group::{GroupConsumer, GroupContext, RebalanceEvent};
pub use handler::{Claim, ConsumerGroupHandler, ExactlyOnceHandler, HandlerError};
pub use message::ConsumerMessage;
pub use readiness::Readiness;
pub use session::{GroupSession, KafkaSession};
