//! All-or-nothing application of independent writes.
//!
//! The storage backend is an external collaborator described by [`BatchStore`]: it hands out a
//! batch handle, closures register writes against that handle, and one commit applies them
//! atomically. An empty operation list never acquires a handle, so no empty commit is sent.
//!
//! ```rust
//! use agora_resilience::batch::batch_write;
//! use agora_resilience::batch::memory::{op, MemoryStore};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store: MemoryStore<i32> = MemoryStore::new();
//! batch_write(&store, vec![
//!     op(|b| b.set("groups/g1", 1)),
//!     op(|b| b.set("groups/g1/members/u1", 1)),
//! ])
//! .await
//! .unwrap();
//! assert_eq!(store.get("groups/g1"), Some(1));
//! assert_eq!(store.commit_calls(), 1);
//! # });
//! ```

pub mod memory;

use crate::telemetry::{BatchEvent, EventEmitter, PolicyEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tower_service::Service;

/// Storage capability consumed by the executor.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Mutable handle writes are registered against.
    type Batch: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Acquire a fresh batch handle.
    fn batch(&self) -> Self::Batch;

    /// Apply every write registered on `batch`, atomically.
    async fn commit(&self, batch: Self::Batch) -> Result<(), Self::Error>;
}

/// One write registration.
pub type BatchOp<B> = Box<dyn FnOnce(&mut B) + Send>;

/// Box a closure as a [`BatchOp`].
///
/// The batch type is not inferred from the closure body; annotate the parameter or use a
/// store-specific helper such as [`memory::op`].
pub fn op<B, F>(f: F) -> BatchOp<B>
where
    F: FnOnce(&mut B) + Send + 'static,
{
    Box::new(f)
}

/// Apply `operations` in order to one batch and commit it once.
///
/// Later writes to the same key override earlier ones, per the store. A commit failure is
/// returned unchanged and covers the whole batch.
pub async fn batch_write<S>(store: &S, operations: Vec<BatchOp<S::Batch>>) -> Result<(), S::Error>
where
    S: BatchStore + ?Sized,
{
    apply(store, operations, &EventEmitter::default()).await
}

async fn apply<S>(
    store: &S,
    operations: Vec<BatchOp<S::Batch>>,
    events: &EventEmitter,
) -> Result<(), S::Error>
where
    S: BatchStore + ?Sized,
{
    if operations.is_empty() {
        tracing::trace!("empty batch skipped");
        events.emit(PolicyEvent::Batch(BatchEvent::Skipped)).await;
        return Ok(());
    }

    let count = operations.len();
    let mut batch = store.batch();
    for operation in operations {
        operation(&mut batch);
    }

    match store.commit(batch).await {
        Ok(()) => {
            tracing::debug!(operations = count, "batch committed");
            events.emit(PolicyEvent::Batch(BatchEvent::Committed { operations: count })).await;
            Ok(())
        }
        Err(err) => {
            tracing::warn!(operations = count, error = %err, "batch commit failed");
            events.emit(PolicyEvent::Batch(BatchEvent::Failed { operations: count })).await;
            Err(err)
        }
    }
}

/// Store handle bundled with an event sink.
pub struct BatchWriter<S> {
    store: Arc<S>,
    events: EventEmitter,
}

impl<S> Clone for BatchWriter<S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), events: self.events.clone() }
    }
}

impl<S> std::fmt::Debug for BatchWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter").field("events", &self.events).finish_non_exhaustive()
    }
}

impl<S> BatchWriter<S>
where
    S: BatchStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store, events: EventEmitter::default() }
    }

    /// Emit `BatchEvent`s to `sink`.
    pub fn with_sink<K>(mut self, sink: K) -> Self
    where
        K: Service<PolicyEvent, Response = ()> + Clone + Send + Sync + 'static,
        K::Error: std::error::Error + Send + 'static,
        K::Future: Send + 'static,
    {
        self.events = EventEmitter::new(sink);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn write(&self, operations: Vec<BatchOp<S::Batch>>) -> Result<(), S::Error> {
        apply(self.store.as_ref(), operations, &self.events).await
    }
}
