//! Error types for the producer pool, consumer groups and admin helpers
//!
//! Every fallible operation in this crate returns [`Result`], so callers
//! can distinguish client failures, broker-reported error codes, partial
//! batch failures and configuration mistakes with a single `match`.

use rdkafka::error::KafkaError as RdKafkaError;
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;

use crate::kafka::constants::{error_name, is_coordinator_retriable};

/// Errors that can occur while talking to Kafka
#[derive(Error, Debug)]
pub enum KafkaError {
    /// The underlying librdkafka client failed an operation
    #[error("{operation} failed: {source}")]
    Client {
        operation: &'static str,
        #[source]
        source: RdKafkaError,
    },

    /// IO error occurred during network operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from kafka-protocol crate (anyhow::Error)
    #[error("Protocol encoding/decoding error: {0}")]
    ProtocolCodec(#[from] anyhow::Error),

    /// A broker answered a whole request with an error code
    #[error("{operation} returned error code {code}: {message}")]
    Protocol {
        operation: &'static str,
        code: i16,
        message: String,
    },

    /// A topic in a batched admin request failed
    #[error("Topic '{topic}' failed: {message}")]
    Topic { topic: String, message: String },

    /// A group in a batched admin request failed
    #[error("Group '{group}' failed: {message}")]
    Group { group: String, message: String },

    /// A partition in a batched admin request failed
    #[error("Partition {topic}/{partition} failed with error code {code}: {message}")]
    Partition {
        topic: String,
        partition: i32,
        code: i16,
        message: String,
    },

    /// The group coordinator could not be located or reached
    #[error("Coordinator error: {0}")]
    Coordinator(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid argument passed to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The producer pool gave up creating a new handle
    #[error("Producer pool exhausted after {attempts} attempts: {source}")]
    PoolExhausted {
        attempts: usize,
        #[source]
        source: Box<KafkaError>,
    },
}

impl KafkaError {
    /// Wrap a librdkafka error with the operation that produced it
    pub fn client(operation: &'static str, source: RdKafkaError) -> Self {
        KafkaError::Client { operation, source }
    }

    /// Build a [`KafkaError::Protocol`] from a broker error code
    pub fn protocol(operation: &'static str, code: i16, message: Option<&str>) -> Self {
        KafkaError::Protocol {
            operation,
            code,
            message: message.unwrap_or(error_name(code)).to_string(),
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            KafkaError::Client { source, .. } => match source {
                RdKafkaError::Transaction(err) => err.is_retriable(),
                other => matches!(
                    other.rdkafka_error_code(),
                    Some(
                        RDKafkaErrorCode::BrokerTransportFailure
                            | RDKafkaErrorCode::AllBrokersDown
                            | RDKafkaErrorCode::OperationTimedOut
                            | RDKafkaErrorCode::RequestTimedOut
                            | RDKafkaErrorCode::NotCoordinator
                            | RDKafkaErrorCode::CoordinatorNotAvailable
                    )
                ),
            },
            KafkaError::Io(_) | KafkaError::Coordinator(_) => true,
            KafkaError::Protocol { code, .. } => is_coordinator_retriable(*code),
            _ => false,
        }
    }
}

impl From<RdKafkaError> for KafkaError {
    fn from(source: RdKafkaError) -> Self {
        KafkaError::Client {
            operation: "kafka client",
            source,
        }
    }
}

/// Result type alias for Kafka operations
pub type Result<T> = std::result::Result<T, KafkaError>;
