//! Per-generation readiness signal
//!
//! Fired once when a handler's `setup` runs for a new generation and
//! cleared again in `cleanup`. Waiters observe the generation number, so a
//! handler reused across rebalances needs no manual re-arming and a waiter
//! that subscribes late still sees the current state.

use std::sync::Arc;

use tokio::sync::watch;

/// Readiness of a consumer group handler
#[derive(Debug, Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<Option<i32>>>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Mark `generation` as ready
    ///
    /// Returns false if this generation was already marked.
    pub fn mark_ready(&self, generation: i32) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == Some(generation) {
                false
            } else {
                *current = Some(generation);
                true
            }
        })
    }

    /// Clear the signal at the end of a generation
    pub fn reset(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    /// Generation currently marked ready, if any
    pub fn current(&self) -> Option<i32> {
        *self.tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    /// Wait until any generation is ready and return it
    pub async fn wait_ready(&self) -> i32 {
        self.wait_until(|_| true).await
    }

    /// Wait until a generation newer than `generation` is ready
    pub async fn wait_ready_after(&self, generation: i32) -> i32 {
        self.wait_until(move |g| g > generation).await
    }

    async fn wait_until(&self, accept: impl Fn(i32) -> bool) -> i32 {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(generation) = *rx.borrow_and_update() {
                if accept(generation) {
                    return generation;
                }
            }
            // The sender lives as long as self, so this cannot fail
            if rx.changed().await.is_err() {
                return self.current().unwrap_or_default();
            }
        }
    }
}
