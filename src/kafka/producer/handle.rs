//! Transactional producer handles
//!
//! [`TransactionalHandle`] is the seam between the producer pool and the
//! actual client: the pool only needs a handle's transaction id, whether
//! it is stuck in a transactional error, and a way to close it.
//! [`KafkaProducer`] is the rdkafka-backed implementation.
//! [`IdempotentProducer`] is the plain, non-transactional counterpart for
//! callers that only need idempotent delivery.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use rdkafka::error::KafkaError as RdKafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::kafka::constants::{DELIVERY_TIMEOUT, TRANSACTION_OP_TIMEOUT};
use crate::kafka::{KafkaError, Result};

/// A producer handle the pool can own, lend and evict
pub trait TransactionalHandle: Send + 'static {
    /// Transaction id this handle was initialized with
    fn transactional_id(&self) -> &str;

    /// True when the last transactional operation left the handle unusable
    ///
    /// A poisoned handle must never be lent out again.
    fn in_transactional_error(&self) -> bool;

    /// Release the underlying client
    fn close(self)
    where
        Self: Sized;
}

/// A record to publish inside a transaction
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub topic: &'a str,
    pub key: Option<&'a [u8]>,
    pub payload: &'a [u8],
}

impl<'a> Record<'a> {
    pub fn new(topic: &'a str, payload: &'a [u8]) -> Self {
        Self {
            topic,
            key: None,
            payload,
        }
    }

    pub fn with_key(mut self, key: &'a [u8]) -> Self {
        self.key = Some(key);
        self
    }
}

/// Transactional producer backed by rdkafka's `FutureProducer`
pub struct KafkaProducer {
    producer: FutureProducer,
    transactional_id: String,
    /// Set by any failed transactional operation, cleared by a successful abort
    in_error: AtomicBool,
    /// Set by a fatal error; never cleared
    fatal: AtomicBool,
}

impl KafkaProducer {
    /// Create the client and register its transaction id with the coordinator
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the client cannot
    /// be created, or `init_transactions` fails (e.g. broker unreachable).
    pub fn connect(
        brokers: &str,
        config: &BrokerConfig,
        transactional_id: impl Into<String>,
    ) -> Result<Self> {
        let transactional_id = transactional_id.into();
        let client_config = config.producer_client_config(brokers, Some(&transactional_id))?;

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| KafkaError::client("create producer", e))?;

        producer
            .init_transactions(TRANSACTION_OP_TIMEOUT)
            .map_err(|e| KafkaError::client("init_transactions", e))?;

        debug!(transactional_id = %transactional_id, "Transactional producer initialized");

        Ok(Self::from_parts(producer, transactional_id))
    }

    fn from_parts(producer: FutureProducer, transactional_id: String) -> Self {
        Self {
            producer,
            transactional_id,
            in_error: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
        }
    }

    /// Access the underlying rdkafka producer
    pub fn inner(&self) -> &FutureProducer {
        &self.producer
    }

    pub fn begin_transaction(&self) -> Result<()> {
        self.producer
            .begin_transaction()
            .map_err(|e| self.record_failure("begin_transaction", e))
    }

    /// Publish one record and wait for its delivery report
    ///
    /// Returns the (partition, offset) the record was written to.
    pub async fn send(&self, record: Record<'_>) -> Result<(i32, i64)> {
        deliver(&self.producer, record)
            .await
            .map_err(|e| self.record_failure("send", e))
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.producer
            .commit_transaction(TRANSACTION_OP_TIMEOUT)
            .map_err(|e| self.record_failure("commit_transaction", e))
    }

    /// Abort the current transaction
    ///
    /// A successful abort makes the handle reusable again unless it hit a
    /// fatal error earlier.
    pub fn abort_transaction(&self) -> Result<()> {
        self.producer
            .abort_transaction(TRANSACTION_OP_TIMEOUT)
            .map_err(|e| self.record_failure("abort_transaction", e))?;
        if !self.fatal.load(Ordering::Acquire) {
            self.in_error.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Begin, send every record, commit. Aborts if any step fails.
    pub async fn send_in_transaction(&self, records: &[Record<'_>]) -> Result<()> {
        self.begin_transaction()?;

        let result = async {
            for record in records {
                self.send(*record).await?;
            }
            self.commit_transaction()
        }
        .await;

        if let Err(err) = result {
            if let Err(abort_err) = self.abort_transaction() {
                warn!(
                    transactional_id = %self.transactional_id,
                    error = %abort_err,
                    "Abort after failed transaction also failed"
                );
            }
            return Err(err);
        }

        Ok(())
    }

    fn record_failure(&self, operation: &'static str, err: RdKafkaError) -> KafkaError {
        if let RdKafkaError::Transaction(ref txn_err) = err {
            if txn_err.is_fatal() {
                self.fatal.store(true, Ordering::Release);
            }
        }
        self.in_error.store(true, Ordering::Release);
        KafkaError::client(operation, err)
    }
}

impl TransactionalHandle for KafkaProducer {
    fn transactional_id(&self) -> &str {
        &self.transactional_id
    }

    fn in_transactional_error(&self) -> bool {
        self.in_error.load(Ordering::Acquire)
    }

    fn close(self) {
        close_client(self.producer, self.transactional_id);
    }
}

/// Idempotent producer without transactions
///
/// Built from [`BrokerConfig::idempotent_producer`] or any other config
/// with `idempotent` set. Records are deduplicated per partition by the
/// broker, but there is no atomic multi-record commit.
pub struct IdempotentProducer {
    producer: FutureProducer,
}

impl IdempotentProducer {
    /// Create the client; no broker is contacted until the first send
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or not idempotent,
    /// or the client cannot be created.
    pub fn connect(brokers: &str, config: &BrokerConfig) -> Result<Self> {
        if !config.idempotent {
            return Err(KafkaError::InvalidConfig(
                "idempotent producer requires idempotent = true".to_string(),
            ));
        }
        let client_config = config.producer_client_config(brokers, None)?;
        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| KafkaError::client("create producer", e))?;

        debug!("Idempotent producer created");
        Ok(Self { producer })
    }

    pub fn inner(&self) -> &FutureProducer {
        &self.producer
    }

    /// Publish one record and wait for its delivery report
    pub async fn send(&self, record: Record<'_>) -> Result<(i32, i64)> {
        deliver(&self.producer, record)
            .await
            .map_err(|e| KafkaError::client("send", e))
    }

    /// Flush outstanding records and release the client
    pub fn close(self) {
        close_client(self.producer, "idempotent".to_string());
    }
}

impl fmt::Debug for IdempotentProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotentProducer").finish_non_exhaustive()
    }
}

async fn deliver(producer: &FutureProducer, record: Record<'_>) -> std::result::Result<(i32, i64), RdKafkaError> {
    let mut future_record: FutureRecord<'_, [u8], [u8]> =
        FutureRecord::to(record.topic).payload(record.payload);
    if let Some(key) = record.key {
        future_record = future_record.key(key);
    }

    producer
        .send(future_record, Timeout::After(DELIVERY_TIMEOUT))
        .await
        .map_err(|(e, _)| e)
}

/// Flush and drop a client
///
/// Inside a tokio runtime the flush runs on the blocking pool, so closing
/// from `Drop` on a worker thread never stalls it.
fn close_client(producer: FutureProducer, name: String) {
    let flush = move || {
        if let Err(e) = producer.flush(Timeout::After(DELIVERY_TIMEOUT)) {
            warn!(producer = %name, error = %e, "Flush before close failed");
        }
        debug!(producer = %name, "Producer closed");
    };

    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(flush);
        }
        Err(_) => flush(),
    }
}

impl fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaProducer")
            .field("transactional_id", &self.transactional_id)
            .field("in_error", &self.in_error.load(Ordering::Relaxed))
            .field("fatal", &self.fatal.load(Ordering::Relaxed))
            .finish()
    }
}
