// Client configuration for kafka_eos
//
// BrokerConfig is the single value shared by producers, consumers and the
// admin helpers. It can be built from a named default, a builder, or any
// serde source, and is mapped onto an rdkafka ClientConfig at construction.

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::kafka::constants::{
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_MAX, DEFAULT_SESSION_TIMEOUT_MS,
    DEFAULT_TRANSACTION_ID_PREFIX, DEFAULT_TRANSACTION_TIMEOUT_MS, IDEMPOTENT_MAX_IN_FLIGHT,
    MAX_RETRY_MAX, MAX_SESSION_TIMEOUT_MS, MIN_SESSION_TIMEOUT_MS,
};
use crate::kafka::{KafkaError, Result};

/// Producer acknowledgement level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acks {
    /// Fire and forget
    None,
    /// Leader write only
    Leader,
    /// All in-sync replicas
    #[default]
    All,
}

impl Acks {
    /// Value of librdkafka's `acks` property
    pub fn as_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

/// Which records a consumer may see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    /// Only records of committed transactions (and non-transactional records)
    #[default]
    ReadCommitted,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
        }
    }
}

/// Where a group starts when it has no committed position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialOffset {
    Oldest,
    #[default]
    Newest,
}

impl InitialOffset {
    /// Value of librdkafka's `auto.offset.reset` property
    pub fn as_str(&self) -> &'static str {
        match self {
            InitialOffset::Oldest => "earliest",
            InitialOffset::Newest => "latest",
        }
    }
}

/// Partition assignment strategy of a consumer group
///
/// Only eager strategies are offered: every rebalance revokes the whole
/// assignment, which is what ends a generation. There is no `Sticky`
/// variant because librdkafka's only sticky assignor is the cooperative
/// `cooperative-sticky`, which revokes partitions incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceStrategy {
    #[default]
    RoundRobin,
    Range,
}

impl RebalanceStrategy {
    /// Value of librdkafka's `partition.assignment.strategy` property
    pub fn as_str(&self) -> &'static str {
        match self {
            RebalanceStrategy::RoundRobin => "roundrobin",
            RebalanceStrategy::Range => "range",
        }
    }
}

/// Partitioner used for keyed and unkeyed records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partitioner {
    /// Hash of the key, random partition for unkeyed records
    #[default]
    ConsistentRandom,
    /// Random partition for every record
    Random,
    /// Java-compatible murmur2 hash of the key
    Murmur2Random,
}

impl Partitioner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partitioner::ConsistentRandom => "consistent_random",
            Partitioner::Random => "random",
            Partitioner::Murmur2Random => "murmur2_random",
        }
    }
}

/// Client configuration shared by producers and consumers
///
/// Invariant: when `idempotent` is set, `max_in_flight_requests` is 1 and
/// `acks` is [`Acks::All`]. Values violating it are rejected by
/// [`BrokerConfig::validate`] rather than silently corrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub acks: Acks,
    pub idempotent: bool,
    pub max_in_flight_requests: u32,
    /// Prefix of the transaction ids generated by the producer pool
    pub transaction_id_prefix: String,
    pub isolation_level: IsolationLevel,
    /// Let the client commit positions in the background
    pub auto_commit_offsets: bool,
    pub initial_offset: InitialOffset,
    pub rebalance_strategy: RebalanceStrategy,
    pub partitioner: Partitioner,
    /// Producer send retries
    pub retry_max: u32,
    pub transaction_timeout_ms: u32,
    pub session_timeout_ms: u32,
    pub request_timeout_ms: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            acks: Acks::All,
            idempotent: false,
            max_in_flight_requests: 5,
            transaction_id_prefix: DEFAULT_TRANSACTION_ID_PREFIX.to_string(),
            isolation_level: IsolationLevel::ReadCommitted,
            auto_commit_offsets: false,
            initial_offset: InitialOffset::Newest,
            rebalance_strategy: RebalanceStrategy::RoundRobin,
            partitioner: Partitioner::ConsistentRandom,
            retry_max: DEFAULT_RETRY_MAX,
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl BrokerConfig {
    /// Idempotent producer with acks=all and a single in-flight request,
    /// ready to be given a transaction id by the producer pool
    pub fn transactional_producer() -> Self {
        Self {
            acks: Acks::All,
            idempotent: true,
            max_in_flight_requests: IDEMPOTENT_MAX_IN_FLIGHT,
            ..Self::default()
        }
    }

    /// Idempotent, non-transactional producer spreading unkeyed records
    /// across partitions, for [`IdempotentProducer`](crate::kafka::IdempotentProducer)
    pub fn idempotent_producer() -> Self {
        Self {
            acks: Acks::All,
            idempotent: true,
            max_in_flight_requests: IDEMPOTENT_MAX_IN_FLIGHT,
            partitioner: Partitioner::Random,
            retry_max: DEFAULT_RETRY_MAX,
            ..Self::default()
        }
    }

    /// Consumer for the exactly-once pipeline: read-committed isolation,
    /// manual commits, newest initial offset, round-robin assignment
    pub fn exactly_once_consumer() -> Self {
        Self {
            isolation_level: IsolationLevel::ReadCommitted,
            auto_commit_offsets: false,
            initial_offset: InitialOffset::Newest,
            rebalance_strategy: RebalanceStrategy::RoundRobin,
            ..Self::default()
        }
    }

    /// Manual-commit consumer that starts from the oldest retained record
    pub fn at_least_once_consumer() -> Self {
        Self {
            isolation_level: IsolationLevel::ReadUncommitted,
            auto_commit_offsets: false,
            initial_offset: InitialOffset::Oldest,
            ..Self::default()
        }
    }

    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::new()
    }

    /// Check the configuration invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight_requests == 0 {
            return Err(KafkaError::InvalidConfig(
                "max_in_flight_requests must be at least 1".to_string(),
            ));
        }

        if self.idempotent {
            if self.max_in_flight_requests != IDEMPOTENT_MAX_IN_FLIGHT {
                return Err(KafkaError::InvalidConfig(format!(
                    "idempotent producers require max_in_flight_requests = 1, got {}",
                    self.max_in_flight_requests
                )));
            }
            if self.acks != Acks::All {
                return Err(KafkaError::InvalidConfig(format!(
                    "idempotent producers require acks = all, got {:?}",
                    self.acks
                )));
            }
            if self.retry_max == 0 {
                return Err(KafkaError::InvalidConfig(
                    "idempotent producers require retry_max > 0".to_string(),
                ));
            }
        }

        if self.retry_max > MAX_RETRY_MAX {
            return Err(KafkaError::InvalidConfig(format!(
                "retry_max {} exceeds maximum {}",
                self.retry_max, MAX_RETRY_MAX
            )));
        }

        if self.transaction_id_prefix.trim().is_empty() {
            return Err(KafkaError::InvalidConfig(
                "transaction_id_prefix must not be empty".to_string(),
            ));
        }

        if !(MIN_SESSION_TIMEOUT_MS..=MAX_SESSION_TIMEOUT_MS).contains(&self.session_timeout_ms) {
            return Err(KafkaError::InvalidConfig(format!(
                "session_timeout_ms {} outside [{}, {}]",
                self.session_timeout_ms, MIN_SESSION_TIMEOUT_MS, MAX_SESSION_TIMEOUT_MS
            )));
        }

        Ok(())
    }

    /// Map this configuration onto a producer `ClientConfig`
    ///
    /// `transactional_id` turns the producer into a transactional one.
    pub fn producer_client_config(
        &self,
        brokers: &str,
        transactional_id: Option<&str>,
    ) -> Result<ClientConfig> {
        self.validate()?;
        let brokers = parse_brokers(brokers)?;

        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", brokers.join(","));
        client_config.set("acks", self.acks.as_str());
        client_config.set("enable.idempotence", self.idempotent.to_string());
        client_config.set(
            "max.in.flight.requests.per.connection",
            self.max_in_flight_requests.to_string(),
        );
        client_config.set("retries", self.retry_max.to_string());
        client_config.set("partitioner", self.partitioner.as_str());
        client_config.set("request.timeout.ms", self.request_timeout_ms.to_string());

        if let Some(id) = transactional_id {
            client_config.set("transactional.id", id);
            client_config.set(
                "transaction.timeout.ms",
                self.transaction_timeout_ms.to_string(),
            );
        }

        Ok(client_config)
    }

    /// Map this configuration onto a group consumer `ClientConfig`
    pub fn consumer_client_config(&self, brokers: &str, group: &str) -> Result<ClientConfig> {
        self.validate()?;
        let brokers = parse_brokers(brokers)?;
        if group.trim().is_empty() {
            return Err(KafkaError::InvalidArgument(
                "consumer group name must not be empty".to_string(),
            ));
        }

        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", brokers.join(","));
        client_config.set("group.id", group);
        client_config.set("enable.auto.commit", self.auto_commit_offsets.to_string());
        // Positions are stored explicitly after processing unless auto commit is on
        client_config.set(
            "enable.auto.offset.store",
            self.auto_commit_offsets.to_string(),
        );
        client_config.set("auto.offset.reset", self.initial_offset.as_str());
        client_config.set("isolation.level", self.isolation_level.as_str());
        client_config.set(
            "partition.assignment.strategy",
            self.rebalance_strategy.as_str(),
        );
        client_config.set("session.timeout.ms", self.session_timeout_ms.to_string());

        Ok(client_config)
    }

    /// Map this configuration onto an admin `ClientConfig`
    pub fn admin_client_config(&self, brokers: &str) -> Result<ClientConfig> {
        let brokers = parse_brokers(brokers)?;
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", brokers.join(","));
        client_config.set("request.timeout.ms", self.request_timeout_ms.to_string());
        Ok(client_config)
    }
}

/// Builder for [`BrokerConfig`], validating on [`build`](Self::build)
#[derive(Debug, Clone, Default)]
pub struct BrokerConfigBuilder {
    config: BrokerConfig,
}

impl BrokerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration (e.g. a named default)
    pub fn from_config(config: BrokerConfig) -> Self {
        Self { config }
    }

    pub fn acks(mut self, acks: Acks) -> Self {
        self.config.acks = acks;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.config.idempotent = idempotent;
        self
    }

    pub fn max_in_flight_requests(mut self, n: u32) -> Self {
        self.config.max_in_flight_requests = n;
        self
    }

    pub fn transaction_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.transaction_id_prefix = prefix.into();
        self
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.config.isolation_level = level;
        self
    }

    pub fn auto_commit_offsets(mut self, enabled: bool) -> Self {
        self.config.auto_commit_offsets = enabled;
        self
    }

    pub fn initial_offset(mut self, offset: InitialOffset) -> Self {
        self.config.initial_offset = offset;
        self
    }

    pub fn rebalance_strategy(mut self, strategy: RebalanceStrategy) -> Self {
        self.config.rebalance_strategy = strategy;
        self
    }

    pub fn partitioner(mut self, partitioner: Partitioner) -> Self {
        self.config.partitioner = partitioner;
        self
    }

    pub fn retry_max(mut self, retries: u32) -> Self {
        self.config.retry_max = retries;
        self
    }

    pub fn transaction_timeout_ms(mut self, ms: u32) -> Self {
        self.config.transaction_timeout_ms = ms;
        self
    }

    pub fn session_timeout_ms(mut self, ms: u32) -> Self {
        self.config.session_timeout_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u32) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Result<BrokerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Split a comma-separated broker list
///
/// Whitespace around entries is trimmed and empty entries are skipped.
/// An empty list is an error.
pub fn parse_brokers(brokers: &str) -> Result<Vec<String>> {
    let list: Vec<String> = brokers
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect();

    if list.is_empty() {
        return Err(KafkaError::InvalidArgument(
            "broker list must not be empty".to_string(),
        ));
    }

    Ok(list)
}
