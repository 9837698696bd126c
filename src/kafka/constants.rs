//! Kafka client constants
//!
//! This module centralizes the magic numbers used by the pool, the consumer
//! group driver and the admin helpers.
//!
//! # Terminology
//! - **API Key**: Identifies which operation/request type (e.g., 10 = FindCoordinator)
//! - **API Version**: Identifies which version of that operation

use std::time::Duration;

// ===== API Keys =====
// Only the requests spoken directly on the wire are listed here. Everything
// else goes through librdkafka.
// See: https://kafka.apache.org/protocol.html#protocol_api_key

/// API key for FindCoordinator requests
///
/// Used to discover the coordinator broker for a consumer group
pub const API_KEY_FIND_COORDINATOR: i16 = 10;

/// API key for OffsetDelete requests
///
/// Used to delete committed offsets of a consumer group (KIP-496)
pub const API_KEY_OFFSET_DELETE: i16 = 47;

/// FindCoordinator version used by the admin wire client
///
/// v2 is the last non-flexible version, so the request header is v1 and
/// the response header is v0.
pub const FIND_COORDINATOR_VERSION: i16 = 2;

/// OffsetDelete version used by the admin wire client (only v0 exists)
pub const OFFSET_DELETE_VERSION: i16 = 0;

/// Request header version for non-flexible requests
pub const REQUEST_HEADER_VERSION: i16 = 1;

/// Response header version for non-flexible responses
pub const RESPONSE_HEADER_VERSION: i16 = 0;

/// Coordinator key type for consumer groups in FindCoordinator
pub const COORDINATOR_KEY_TYPE_GROUP: i8 = 0;

/// Client id sent in raw protocol request headers
pub const WIRE_CLIENT_ID: &str = "kafka-eos-admin";

/// Maximum accepted response frame size (100 MB)
pub const MAX_RESPONSE_SIZE: usize = 100 * 1024 * 1024;

// ===== Error Codes =====
// See: https://kafka.apache.org/protocol.html#protocol_error_codes

/// No error occurred
pub const ERROR_NONE: i16 = 0;

/// Unknown server error
pub const ERROR_UNKNOWN_SERVER_ERROR: i16 = -1;

/// Topic or partition does not exist on this broker
pub const ERROR_UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;

/// Coordinator is loading
pub const ERROR_COORDINATOR_LOAD_IN_PROGRESS: i16 = 14;

/// Coordinator not available
pub const ERROR_COORDINATOR_NOT_AVAILABLE: i16 = 15;

/// Not coordinator for this group
pub const ERROR_NOT_COORDINATOR: i16 = 16;

/// Invalid topic name
pub const ERROR_INVALID_TOPIC_EXCEPTION: i16 = 17;

/// Invalid group id
pub const ERROR_INVALID_GROUP_ID: i16 = 24;

/// Client is not authorized to access the group
pub const ERROR_GROUP_AUTHORIZATION_FAILED: i16 = 30;

/// Topic already exists
pub const ERROR_TOPIC_ALREADY_EXISTS: i16 = 36;

/// Invalid number of partitions
pub const ERROR_INVALID_PARTITIONS: i16 = 37;

/// Invalid replication factor
pub const ERROR_INVALID_REPLICATION_FACTOR: i16 = 38;

/// The group is not empty (DeleteGroups)
pub const ERROR_NON_EMPTY_GROUP: i16 = 68;

/// The group does not exist
pub const ERROR_GROUP_ID_NOT_FOUND: i16 = 69;

/// The group has active members subscribed to the partition (OffsetDelete)
pub const ERROR_GROUP_SUBSCRIBED_TO_TOPIC: i16 = 86;

/// Human-readable name of a broker error code
pub fn error_name(code: i16) -> &'static str {
    match code {
        ERROR_NONE => "NONE",
        ERROR_UNKNOWN_SERVER_ERROR => "UNKNOWN_SERVER_ERROR",
        ERROR_UNKNOWN_TOPIC_OR_PARTITION => "UNKNOWN_TOPIC_OR_PARTITION",
        ERROR_COORDINATOR_LOAD_IN_PROGRESS => "COORDINATOR_LOAD_IN_PROGRESS",
        ERROR_COORDINATOR_NOT_AVAILABLE => "COORDINATOR_NOT_AVAILABLE",
        ERROR_NOT_COORDINATOR => "NOT_COORDINATOR",
        ERROR_INVALID_TOPIC_EXCEPTION => "INVALID_TOPIC_EXCEPTION",
        ERROR_INVALID_GROUP_ID => "INVALID_GROUP_ID",
        ERROR_GROUP_AUTHORIZATION_FAILED => "GROUP_AUTHORIZATION_FAILED",
        ERROR_TOPIC_ALREADY_EXISTS => "TOPIC_ALREADY_EXISTS",
        ERROR_INVALID_PARTITIONS => "INVALID_PARTITIONS",
        ERROR_INVALID_REPLICATION_FACTOR => "INVALID_REPLICATION_FACTOR",
        ERROR_NON_EMPTY_GROUP => "NON_EMPTY_GROUP",
        ERROR_GROUP_ID_NOT_FOUND => "GROUP_ID_NOT_FOUND",
        ERROR_GROUP_SUBSCRIBED_TO_TOPIC => "GROUP_SUBSCRIBED_TO_TOPIC",
        _ => "UNKNOWN",
    }
}

/// Whether a coordinator error code means "look the coordinator up again"
pub fn is_coordinator_retriable(code: i16) -> bool {
    matches!(
        code,
        ERROR_COORDINATOR_LOAD_IN_PROGRESS | ERROR_COORDINATOR_NOT_AVAILABLE | ERROR_NOT_COORDINATOR
    )
}

// ===== Timeouts =====

/// Request timeout for admin operations (topic creation, group deletion)
pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default transaction timeout for transactional producers
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u32 = 60_000;

/// Default consumer session timeout
pub const DEFAULT_SESSION_TIMEOUT_MS: u32 = 10_000;

/// Default request timeout for producer and consumer clients
pub const DEFAULT_REQUEST_TIMEOUT_MS: u32 = 30_000;

/// Minimum allowed session timeout (broker default for group.min.session.timeout.ms)
pub const MIN_SESSION_TIMEOUT_MS: u32 = 6_000;

/// Maximum allowed session timeout (broker default for group.max.session.timeout.ms)
pub const MAX_SESSION_TIMEOUT_MS: u32 = 1_800_000;

/// Timeout for transactional control calls (init, commit, abort)
pub const TRANSACTION_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery timeout for a single produced record
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a revoke callback waits for claim loops to finish their commits
pub const REVOKE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

// ===== Producer Defaults =====

/// Default prefix for generated transaction ids
pub const DEFAULT_TRANSACTION_ID_PREFIX: &str = "kafka-eos";

/// Default number of producer retries
pub const DEFAULT_RETRY_MAX: u32 = 3;

/// Maximum configurable producer retries
pub const MAX_RETRY_MAX: u32 = 1_000;

/// Maximum in-flight requests per connection for idempotent producers
pub const IDEMPOTENT_MAX_IN_FLIGHT: u32 = 1;

// ===== Pool Backoff =====

/// First delay between failed handle creations
pub const DEFAULT_BORROW_MIN_DELAY: Duration = Duration::from_millis(50);

/// Upper bound on the delay between failed handle creations
pub const DEFAULT_BORROW_MAX_DELAY: Duration = Duration::from_secs(5);

/// Factory attempts before `borrow` gives up
pub const DEFAULT_BORROW_MAX_ATTEMPTS: usize = 10;

// ===== Consumer =====

/// Buffered messages per claim before the fetch loop applies backpressure
pub const CLAIM_CHANNEL_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_name_known_codes() {
        assert_eq!(error_name(ERROR_NONE), "NONE");
        assert_eq!(
            error_name(ERROR_UNKNOWN_TOPIC_OR_PARTITION),
            "UNKNOWN_TOPIC_OR_PARTITION"
        );
        assert_eq!(error_name(ERROR_TOPIC_ALREADY_EXISTS), "TOPIC_ALREADY_EXISTS");
        assert_eq!(error_name(ERROR_NON_EMPTY_GROUP), "NON_EMPTY_GROUP");
    }

    #[test]
    fn test_error_name_unknown_code() {
        assert_eq!(error_name(9999), "UNKNOWN");
    }

    #[test]
    fn test_coordinator_retriable_codes() {
        assert!(is_coordinator_retriable(ERROR_NOT_COORDINATOR));
        assert!(is_coordinator_retriable(ERROR_COORDINATOR_NOT_AVAILABLE));
        assert!(is_coordinator_retriable(ERROR_COORDINATOR_LOAD_IN_PROGRESS));
        assert!(!is_coordinator_retriable(ERROR_GROUP_ID_NOT_FOUND));
    }

    #[test]
    fn test_session_timeout_bounds() {
        assert!(MIN_SESSION_TIMEOUT_MS <= DEFAULT_SESSION_TIMEOUT_MS);
        assert!(DEFAULT_SESSION_TIMEOUT_MS <= MAX_SESSION_TIMEOUT_MS);
    }
}
