use super::windows;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Counters for one `"{prefix}:{identity}"` key.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitState {
    pub day_count: u32,
    /// UTC date (`YYYY-MM-DD`) `day_count` belongs to.
    pub day_key: String,
    pub minute_count: u32,
    pub minute_window_start_ms: u64,
    /// Last touch, admitted or not. Only garbage collection reads it.
    pub updated_at_ms: u64,
}

impl RateLimitState {
    /// Zero counts with both windows anchored at `now_ms`.
    pub fn fresh(now_ms: u64) -> Self {
        Self {
            day_count: 0,
            day_key: windows::day_key(now_ms),
            minute_count: 0,
            minute_window_start_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }
}

/// Keyed storage for limiter state.
///
/// Every method is synchronous; `update` must run its closure atomically with respect to
/// other calls on the same key, so concurrent checks never lose an increment. A shared
/// counter service can stand in here for multi-instance deployments.
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Run `f` on the state for `key`, creating `RateLimitState::fresh(now_ms)` first if absent.
    fn update<R>(&self, key: &str, now_ms: u64, f: impl FnOnce(&mut RateLimitState) -> R) -> R;

    fn get(&self, key: &str) -> Option<RateLimitState>;

    /// Remove entries last touched before `cutoff_ms`, returning how many went.
    fn evict_older_than(&self, cutoff_ms: u64) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutex-guarded in-process map. State is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    data: Mutex<HashMap<String, RateLimitState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateLimitState>> {
        // Counters stay consistent across a panicking caller; keep serving.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for InMemoryStateStore {
    fn update<R>(&self, key: &str, now_ms: u64, f: impl FnOnce(&mut RateLimitState) -> R) -> R {
        let mut guard = self.lock();
        let state = guard.entry(key.to_owned()).or_insert_with(|| RateLimitState::fresh(now_ms));
        f(state)
    }

    fn get(&self, key: &str) -> Option<RateLimitState> {
        self.lock().get(key).cloned()
    }

    fn evict_older_than(&self, cutoff_ms: u64) -> usize {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|_, state| state.updated_at_ms >= cutoff_ms);
        before - guard.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_creates_then_reuses_entry() {
        let store = InMemoryStateStore::new();
        store.update("k", 1_000, |s| s.day_count += 1);
        store.update("k", 9_000, |s| s.day_count += 1);

        let state = store.get("k").unwrap();
        assert_eq!(state.day_count, 2);
        assert_eq!(state.minute_window_start_ms, 1_000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eviction_uses_last_touch() {
        let store = InMemoryStateStore::new();
        store.update("old", 1_000, |_| ());
        store.update("new", 5_000, |_| ());

        assert_eq!(store.evict_older_than(5_000), 1);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
        assert_eq!(store.evict_older_than(5_000), 0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = std::sync::Arc::new(InMemoryStateStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.update("shared", 0, |s| s.minute_count += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("shared").unwrap().minute_count, 800);
    }
}
