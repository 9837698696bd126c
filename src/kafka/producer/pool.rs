//! Pool of transactional producer handles
//!
//! The pool lends handles out one at a time and reuses them LIFO, so the
//! most recently returned (warmest) producer is handed out first. It grows
//! lazily: when no idle handle is available a new one is created with a
//! fresh transaction id. Handles stuck in a transactional error are closed
//! on release and never lent out again.
//!
//! ## Locking
//!
//! One mutex guards the idle stack and the set of live transaction ids.
//! It is never held while the factory runs or while a handle is closed.
//!
//! ## Cancellation
//!
//! A `borrow` future may be dropped while the factory is running (e.g.
//! under `tokio::time::timeout`). The id reserved for that attempt is
//! released with the future, and the handle the factory produces after
//! that is closed instead of leaking.

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use super::handle::{KafkaProducer, TransactionalHandle};
use crate::config::{parse_brokers, BrokerConfig};
use crate::kafka::constants::{
    DEFAULT_BORROW_MAX_ATTEMPTS, DEFAULT_BORROW_MAX_DELAY, DEFAULT_BORROW_MIN_DELAY,
};
use crate::kafka::log_sink::{default_sink, LogEvent, LogSink};
use crate::kafka::{KafkaError, Result};

type Factory<P> = Arc<dyn Fn(String) -> Result<P> + Send + Sync>;

/// Backoff applied while `borrow` keeps failing to create a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Factory attempts before giving up; `None` retries forever
    pub max_attempts: Option<usize>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_BORROW_MIN_DELAY,
            max_delay: DEFAULT_BORROW_MAX_DELAY,
            max_attempts: Some(DEFAULT_BORROW_MAX_ATTEMPTS),
        }
    }
}

impl PoolOptions {
    /// Keep retrying until the factory succeeds
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        // with_max_times counts retries, not attempts
        let retries = match self.max_attempts {
            Some(attempts) => attempts.saturating_sub(1),
            None => usize::MAX,
        };
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(retries)
            .with_jitter()
    }
}

struct PoolState<P> {
    /// Released handles, most recent last
    idle: Vec<P>,
    /// Transaction ids of every handle owned by the pool or lent out
    live: HashSet<String>,
}

/// Transaction id registered as live until disarmed or dropped
struct Reservation<P> {
    state: Arc<Mutex<PoolState<P>>>,
    id: Option<String>,
}

impl<P> Reservation<P> {
    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    fn disarm(mut self) {
        self.id = None;
    }
}

impl<P> Drop for Reservation<P> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.state.lock().live.remove(&id);
        }
    }
}

/// A bounded-reuse pool of transactional producers
pub struct ProducerPool<P: TransactionalHandle> {
    state: Arc<Mutex<PoolState<P>>>,
    factory: Factory<P>,
    id_prefix: String,
    options: PoolOptions,
    log: Arc<dyn LogSink>,
}

impl ProducerPool<KafkaProducer> {
    /// Create a pool of rdkafka transactional producers
    ///
    /// `capacity_hint` only pre-sizes the idle stack; handles are created on
    /// demand. `conf` is called for every new handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker list is empty or the configuration
    /// returned by `conf` is invalid.
    pub fn new<F>(brokers: &str, capacity_hint: usize, conf: F) -> Result<Self>
    where
        F: Fn() -> BrokerConfig + Send + Sync + 'static,
    {
        let brokers = parse_brokers(brokers)?.join(",");
        let initial = conf();
        initial.validate()?;

        let factory = move |transactional_id: String| {
            KafkaProducer::connect(&brokers, &conf(), transactional_id)
        };

        Ok(Self::with_factory(
            initial.transaction_id_prefix,
            capacity_hint,
            factory,
        ))
    }
}

impl<P: TransactionalHandle> ProducerPool<P> {
    /// Create a pool over any handle type
    ///
    /// The factory receives the transaction id the new handle must use.
    pub fn with_factory<F>(id_prefix: impl Into<String>, capacity_hint: usize, factory: F) -> Self
    where
        F: Fn(String) -> Result<P> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                idle: Vec::with_capacity(capacity_hint),
                live: HashSet::with_capacity(capacity_hint),
            })),
            factory: Arc::new(factory),
            id_prefix: id_prefix.into(),
            options: PoolOptions::default(),
            log: default_sink(),
        }
    }

    pub fn with_options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    /// Borrow a handle, creating one if none is idle
    ///
    /// The handle returns to the pool when the [`Lease`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`KafkaError::PoolExhausted`] if the factory keeps failing
    /// for the configured number of attempts.
    pub async fn borrow(&self) -> Result<Lease<'_, P>> {
        let idle = self.state.lock().idle.pop();
        if let Some(handle) = idle {
            return Ok(Lease::new(self, handle));
        }

        let handle = self.create_with_backoff().await?;
        Ok(Lease::new(self, handle))
    }

    /// Return a handle obtained from [`Lease::detach`]
    pub fn release_handle(&self, handle: P) {
        let rejected = {
            let mut state = self.state.lock();
            let id = handle.transactional_id();
            if !state.live.contains(id) {
                Some((handle, "handle does not belong to this pool"))
            } else if handle.in_transactional_error() {
                state.live.remove(id);
                Some((handle, "handle in transactional error evicted"))
            } else {
                state.idle.push(handle);
                None
            }
        };

        if let Some((handle, reason)) = rejected {
            self.log.log(
                LogEvent::warn("release", reason).field("transactional_id", handle.transactional_id()),
            );
            handle.close();
        }
    }

    /// Close every idle handle
    ///
    /// Handles currently lent out are unaffected and return normally.
    pub fn clear(&self) {
        let drained: Vec<P> = {
            let mut state = self.state.lock();
            let drained: Vec<P> = state.idle.drain(..).collect();
            for handle in &drained {
                state.live.remove(handle.transactional_id());
            }
            drained
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), "Closing idle producers");
        }
        for handle in drained {
            handle.close();
        }
    }

    /// Number of idle handles
    pub fn idle_len(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Number of handles owned by the pool, idle or lent out
    pub fn live_len(&self) -> usize {
        self.state.lock().live.len()
    }

    async fn create_with_backoff(&self) -> Result<P> {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let pool = self;

        let result = (move || async move {
            counter.fetch_add(1, Ordering::Relaxed);
            pool.create_once().await
        })
        .retry(self.options.backoff())
        .notify(|err: &KafkaError, delay: Duration| {
            self.log.log(
                LogEvent::warn("borrow", "producer creation failed, retrying")
                    .with_error(err)
                    .field("delay_ms", delay.as_millis()),
            );
        })
        .await;

        result.map_err(|err| {
            let attempts = attempts.load(Ordering::Relaxed);
            self.log.log(
                LogEvent::error("borrow", "giving up on producer creation")
                    .with_error(&err)
                    .field("attempts", attempts),
            );
            KafkaError::PoolExhausted {
                attempts,
                source: Box::new(err),
            }
        })
    }

    async fn create_once(&self) -> Result<P> {
        let reservation = self.reserve_id();
        let factory = Arc::clone(&self.factory);
        let id = reservation.id().to_string();
        let factory_id = id.clone();

        // The result goes back over a oneshot so a handle created after the
        // caller went away is closed by the blocking task itself
        let (tx, rx) = oneshot::channel();
        let task = tokio::task::spawn_blocking(move || {
            if let Err(Ok(orphan)) = tx.send(factory(factory_id)) {
                debug!(transactional_id = %orphan.transactional_id(), "Closing producer of a cancelled borrow");
                orphan.close();
            }
        });

        let created = match rx.await {
            Ok(created) => created,
            Err(_) => {
                // The sender only goes away without a result if the factory panicked
                return match task.await {
                    Err(join_err) if join_err.is_panic() => {
                        std::panic::resume_unwind(join_err.into_panic())
                    }
                    _ => Err(KafkaError::Io(std::io::Error::other(
                        "producer factory task cancelled",
                    ))),
                };
            }
        };
        let handle = created?;

        if handle.transactional_id() != id {
            // The factory chose its own id; track that one instead
            let accepted = self
                .state
                .lock()
                .live
                .insert(handle.transactional_id().to_string());
            if !accepted {
                let duplicate = handle.transactional_id().to_string();
                handle.close();
                return Err(KafkaError::InvalidArgument(format!(
                    "factory returned a handle with live transaction id '{}'",
                    duplicate
                )));
            }
        } else {
            reservation.disarm();
        }

        debug!(transactional_id = %handle.transactional_id(), "Created pooled producer");
        Ok(handle)
    }

    /// Generate a transaction id no live handle uses and register it
    fn reserve_id(&self) -> Reservation<P> {
        let mut state = self.state.lock();
        loop {
            let id = format!("{}-{}", self.id_prefix, Uuid::new_v4());
            if state.live.insert(id.clone()) {
                return Reservation {
                    state: Arc::clone(&self.state),
                    id: Some(id),
                };
            }
        }
    }

    fn unregister(&self, id: &str) {
        self.state.lock().live.remove(id);
    }
}

impl<P: TransactionalHandle> Drop for ProducerPool<P> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<P: TransactionalHandle> fmt::Debug for ProducerPool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ProducerPool")
            .field("id_prefix", &self.id_prefix)
            .field("idle", &state.idle.len())
            .field("live", &state.live.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Exclusive loan of a pooled handle
///
/// Dereferences to the handle. Dropping the lease returns the handle to
/// the pool, or closes it if it is in a transactional error.
pub struct Lease<'a, P: TransactionalHandle> {
    pool: &'a ProducerPool<P>,
    handle: Option<P>,
}

impl<'a, P: TransactionalHandle> Lease<'a, P> {
    fn new(pool: &'a ProducerPool<P>, handle: P) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    /// Return the handle to the pool now
    pub fn release(self) {
        drop(self);
    }

    /// Take the handle out of the pool for good
    ///
    /// Its transaction id stays reserved until the handle is given back
    /// with [`ProducerPool::release_handle`].
    pub fn detach(mut self) -> P {
        self.take()
    }

    /// Close the handle and free its transaction id
    pub fn discard(mut self) {
        let handle = self.take();
        self.pool.unregister(handle.transactional_id());
        handle.close();
    }

    fn take(&mut self) -> P {
        self.handle
            .take()
            .expect("lease holds its handle until consumed")
    }
}

impl<P: TransactionalHandle> Deref for Lease<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.handle
            .as_ref()
            .expect("lease holds its handle until consumed")
    }
}

impl<P: TransactionalHandle> DerefMut for Lease<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.handle
            .as_mut()
            .expect("lease holds its handle until consumed")
    }
}

impl<P: TransactionalHandle> Drop for Lease<'_, P> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release_handle(handle);
        }
    }
}
