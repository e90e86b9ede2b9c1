//! In-memory [`BatchStore`] for tests and local tooling.
//!
//! Commits are atomic: writes are staged on a copy of the map and swapped in only if every
//! write applies. `update` on a missing key fails the whole commit with `NotFound`.

use super::{BatchOp, BatchStore};
use crate::error::{ErrorKind, TypedError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
enum Write<V> {
    Set(String, V),
    Update(String, V),
    Delete(String),
}

/// Writes registered against one [`MemoryStore`] commit.
#[derive(Debug)]
pub struct MemoryBatch<V> {
    writes: Vec<Write<V>>,
}

impl<V> MemoryBatch<V> {
    /// Create or overwrite `key`.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        self.writes.push(Write::Set(key.into(), value));
    }

    /// Overwrite `key`, which must already exist when the batch commits.
    pub fn update(&mut self, key: impl Into<String>, value: V) {
        self.writes.push(Write::Update(key.into(), value));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.writes.push(Write::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Box a closure over a [`MemoryBatch`] as a [`BatchOp`], so `|b| b.set(..)` needs no annotation.
pub fn op<V, F>(f: F) -> BatchOp<MemoryBatch<V>>
where
    F: FnOnce(&mut MemoryBatch<V>) + Send + 'static,
{
    Box::new(f)
}

/// Keyed document map with call counters. Clones share state.
#[derive(Debug)]
pub struct MemoryStore<V> {
    docs: Arc<Mutex<HashMap<String, V>>>,
    batches: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
    fail_next: Arc<AtomicBool>,
}

impl<V> Clone for MemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            docs: self.docs.clone(),
            batches: self.batches.clone(),
            commits: self.commits.clone(),
            fail_next: self.fail_next.clone(),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            docs: Arc::new(Mutex::new(HashMap::new())),
            batches: Arc::new(AtomicUsize::new(0)),
            commits: Arc::new(AtomicUsize::new(0)),
            fail_next: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch handles handed out so far.
    pub fn batches_acquired(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Commit attempts so far, failed ones included.
    pub fn commit_calls(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next commit fail with `Unavailable` without applying anything.
    pub fn fail_next_commit(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, V>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V: Clone> MemoryStore<V> {
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }
}

#[async_trait]
impl<V> BatchStore for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Batch = MemoryBatch<V>;
    type Error = TypedError;

    fn batch(&self) -> MemoryBatch<V> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        MemoryBatch { writes: Vec::new() }
    }

    async fn commit(&self, batch: MemoryBatch<V>) -> Result<(), TypedError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TypedError::new(ErrorKind::Unavailable, "store unavailable")
                .with_code("unavailable"));
        }

        let mut docs = self.lock();
        let mut staged = docs.clone();
        for write in batch.writes {
            match write {
                Write::Set(key, value) => {
                    staged.insert(key, value);
                }
                Write::Update(key, value) => match staged.get_mut(&key) {
                    Some(slot) => *slot = value,
                    None => {
                        return Err(TypedError::new(ErrorKind::NotFound, "no document to update")
                            .with_code("not-found")
                            .with_context("key", key));
                    }
                },
                Write::Delete(key) => {
                    staged.remove(&key);
                }
            }
        }
        *docs = staged;
        Ok(())
    }
}
