//! Owned consumer records

use bytes::Bytes;
use rdkafka::message::{BorrowedMessage, Message};

/// A record delivered to a claim
///
/// Owned copy of the fetched message so it can cross task boundaries
/// without holding on to librdkafka's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Bytes,
    /// Create or log-append time in milliseconds since the epoch
    pub timestamp_ms: Option<i64>,
}

impl ConsumerMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, value: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value: value.into(),
            timestamp_ms: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Position to commit once this message has been processed
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }

    /// Value as UTF-8, if it is valid
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

impl From<&BorrowedMessage<'_>> for ConsumerMessage {
    fn from(message: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(Bytes::copy_from_slice),
            value: message
                .payload()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            timestamp_ms: message.timestamp().to_millis(),
        }
    }
}
