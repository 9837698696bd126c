//! Raw wire client for admin requests librdkafka does not expose
//!
//! Deleting committed offsets (OffsetDelete, KIP-496) has to go to the
//! group coordinator, which is located with FindCoordinator first. Both
//! requests are non-flexible versions, so the request header is v1 and the
//! response header v0. Frames carry Kafka's 4-byte big-endian size prefix,
//! handled by `LengthDelimitedCodec`.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use kafka_protocol::messages::find_coordinator_request::FindCoordinatorRequest;
use kafka_protocol::messages::find_coordinator_response::FindCoordinatorResponse;
use kafka_protocol::messages::offset_delete_request::{
    OffsetDeleteRequest, OffsetDeleteRequestPartition, OffsetDeleteRequestTopic,
};
use kafka_protocol::messages::offset_delete_response::OffsetDeleteResponse;
use kafka_protocol::messages::{GroupId, RequestHeader, ResponseHeader, TopicName};
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use super::PartitionOutcome;
use crate::kafka::constants::{
    API_KEY_FIND_COORDINATOR, API_KEY_OFFSET_DELETE, COORDINATOR_KEY_TYPE_GROUP, ERROR_NONE,
    FIND_COORDINATOR_VERSION, MAX_RESPONSE_SIZE, OFFSET_DELETE_VERSION, REQUEST_HEADER_VERSION,
    RESPONSE_HEADER_VERSION, WIRE_CLIENT_ID,
};
use crate::kafka::{KafkaError, Result};

/// Retries for coordinator lookups that race a coordinator move
fn coordinator_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(3)
        .with_jitter()
}

/// Encode a request frame body (header + request, without size prefix)
pub(crate) fn encode_request<R: Encodable>(
    api_key: i16,
    version: i16,
    correlation_id: i32,
    request: &R,
) -> Result<BytesMut> {
    let header = RequestHeader::default()
        .with_request_api_key(api_key)
        .with_request_api_version(version)
        .with_correlation_id(correlation_id)
        .with_client_id(Some(StrBytes::from_static_str(WIRE_CLIENT_ID)));

    let mut buf = BytesMut::new();
    header.encode(&mut buf, REQUEST_HEADER_VERSION)?;
    request.encode(&mut buf, version)?;
    Ok(buf)
}

pub(crate) fn build_offset_delete_request(
    group: &str,
    partitions: &BTreeMap<String, BTreeSet<i32>>,
) -> OffsetDeleteRequest {
    let mut request = OffsetDeleteRequest::default();
    request.group_id = GroupId(StrBytes::from_string(group.to_string()));
    for (topic, indexes) in partitions {
        let mut request_topic = OffsetDeleteRequestTopic::default();
        request_topic.name = TopicName(StrBytes::from_string(topic.clone()));
        for index in indexes {
            let mut partition = OffsetDeleteRequestPartition::default();
            partition.partition_index = *index;
            request_topic.partitions.push(partition);
        }
        request.topics.push(request_topic);
    }
    request
}

/// Flatten an OffsetDelete response, failing on a group-level error
pub(crate) fn partition_outcomes(response: &OffsetDeleteResponse) -> Result<Vec<PartitionOutcome>> {
    if response.error_code != ERROR_NONE {
        return Err(KafkaError::protocol("OffsetDelete", response.error_code, None));
    }

    let mut outcomes: Vec<PartitionOutcome> = response
        .topics
        .iter()
        .flat_map(|topic| {
            topic.partitions.iter().map(move |p| PartitionOutcome {
                topic: topic.name.0.to_string(),
                partition: p.partition_index,
                error_code: p.error_code,
            })
        })
        .collect();
    outcomes.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));
    Ok(outcomes)
}

/// One connection to one broker
pub struct BrokerConnection {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    correlation_id: i32,
    addr: String,
}

impl BrokerConnection {
    pub async fn connect(addr: &str) -> Result<Self> {
        let socket = TcpStream::connect(addr).await?;
        let framed = Framed::new(
            socket,
            LengthDelimitedCodec::builder()
                .big_endian()
                .length_field_length(4)
                .max_frame_length(MAX_RESPONSE_SIZE)
                .new_codec(),
        );

        Ok(Self {
            framed,
            correlation_id: 0,
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call<Req, Resp>(&mut self, api_key: i16, version: i16, request: &Req) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        self.correlation_id = self.correlation_id.wrapping_add(1);
        let frame = encode_request(api_key, version, self.correlation_id, request)?;
        self.framed.send(frame.freeze()).await?;

        let mut response = self.framed.next().await.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection to {} closed before response", self.addr),
            )
        })??;

        let header = ResponseHeader::decode(&mut response, RESPONSE_HEADER_VERSION)?;
        if header.correlation_id != self.correlation_id {
            return Err(KafkaError::ProtocolCodec(anyhow::anyhow!(
                "correlation id mismatch: sent {}, got {}",
                self.correlation_id,
                header.correlation_id
            )));
        }

        Ok(Resp::decode(&mut response, version)?)
    }

    /// Address ("host:port") of the coordinator of `group`
    pub async fn find_coordinator(&mut self, group: &str) -> Result<String> {
        let mut request = FindCoordinatorRequest::default();
        request.key = StrBytes::from_string(group.to_string());
        request.key_type = COORDINATOR_KEY_TYPE_GROUP;

        let response: FindCoordinatorResponse = self
            .call(API_KEY_FIND_COORDINATOR, FIND_COORDINATOR_VERSION, &request)
            .await?;

        if response.error_code != ERROR_NONE {
            return Err(KafkaError::protocol(
                "FindCoordinator",
                response.error_code,
                response.error_message.as_ref().map(|m| m.as_str()),
            ));
        }

        Ok(format!("{}:{}", response.host.as_str(), response.port))
    }

    /// Delete the committed offsets of the given partitions
    ///
    /// Must be sent to the group coordinator.
    pub async fn delete_offsets(
        &mut self,
        group: &str,
        partitions: &BTreeMap<String, BTreeSet<i32>>,
    ) -> Result<Vec<PartitionOutcome>> {
        let request = build_offset_delete_request(group, partitions);
        let response: OffsetDeleteResponse = self
            .call(API_KEY_OFFSET_DELETE, OFFSET_DELETE_VERSION, &request)
            .await?;
        partition_outcomes(&response)
    }
}

/// Ask each bootstrap broker in turn for the coordinator of `group`
async fn locate_coordinator(brokers: &[String], group: &str) -> Result<String> {
    let mut last_err = None;
    for broker in brokers {
        let attempt = async {
            let mut conn = BrokerConnection::connect(broker).await?;
            conn.find_coordinator(group).await
        };
        match attempt.await {
            Ok(coordinator) => {
                debug!(group = %group, coordinator = %coordinator, "Located group coordinator");
                return Ok(coordinator);
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        KafkaError::Coordinator(format!("no broker to locate coordinator of '{}'", group))
    }))
}

/// Refresh the coordinator of `group` and delete the offsets of `partitions`
///
/// Coordinator moves and connection failures are retried; the whole call
/// is bounded by `timeout`.
pub async fn delete_group_offsets(
    brokers: &[String],
    group: &str,
    partitions: &BTreeMap<String, BTreeSet<i32>>,
    timeout: Duration,
) -> Result<Vec<PartitionOutcome>> {
    let attempt = move || async move {
        let coordinator = locate_coordinator(brokers, group).await?;
        let mut conn = BrokerConnection::connect(&coordinator).await?;
        conn.delete_offsets(group, partitions).await
    };

    tokio::time::timeout(
        timeout,
        attempt
            .retry(coordinator_policy())
            .when(KafkaError::is_retriable),
    )
    .await
    .map_err(|_| {
        KafkaError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("deleting offsets of group '{}' timed out", group),
        ))
    })?
}
