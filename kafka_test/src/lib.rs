//! kafka_eos E2E Test Suite
//!
//! End-to-end tests of the producer pool, the exactly-once consumer and
//! the admin helpers against a live Kafka broker, with:
//! - Test isolation via unique topic/group names
//! - Cleanup of created topics and groups
//! - Assertions returning errors so the run continues
//!
//! ## Test Categories
//!
//! - **producer_pool**: transactional cycles, abort visibility, concurrent borrowers
//! - **consumer_group**: exactly-once consumption and redelivery
//! - **admin**: topic creation, offset reset, group deletion
//!
//! ## Usage
//!
//! ```bash
//! # Run all tests against localhost:9092
//! cargo run --release
//!
//! # Against another cluster
//! KAFKA_BOOTSTRAP_SERVERS="broker1:9092,broker2:9092" cargo run --release
//! ```

// Infrastructure modules
pub mod assertions;
pub mod common;
pub mod setup;

// Test modules
pub mod admin;
pub mod consumer_group;
pub mod producer_pool;

// Re-export infrastructure
pub use assertions::*;
pub use setup::TestContext;

// Re-export test functions for convenience
pub use admin::{test_create_topic_twice, test_delete_consumer_group, test_reset_offsets_partial_failure};
pub use consumer_group::{test_exactly_once_consume, test_failed_message_redelivered};
pub use producer_pool::{
    test_idempotent_producer_delivers, test_pool_abort_is_invisible,
    test_pool_concurrent_borrowers, test_pool_transactional_cycles,
};
