//! Keyed thundering-herd lock (spec.md §4.C, §5): on a cache miss whose
//! rebuild is expensive, exactly one caller rebuilds while the others wait
//! on the same key rather than racing a duplicate rebuild. Generalizes the
//! `contentmap:<tenant>`-keyed lock the source uses for content-map rebuilds
//! into a primitive any cache-miss path can reach for.

use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Clone, Default)]
pub struct SingleflightGroup {
    locks: Arc<SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SingleflightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Rebuild `key`, but only if `probe` still reports a miss once the lock
    /// is acquired — a winner that raced ahead of this caller may already
    /// have populated the cache while this caller was waiting.
    pub async fn run_or_cached<P, F, Fut, T>(&self, key: &str, mut probe: P, rebuild: F) -> T
    where
        P: FnMut() -> Option<T>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        if let Some(cached) = probe() {
            return cached;
        }
        rebuild().await
    }

    /// Run `f` while holding the lock for `key`, serializing every caller
    /// that names the same key (spec.md §5 "per-fingerprint write
    /// serialization"). Unlike `run_or_cached` there is no probe: the caller
    /// always runs, it just never runs concurrently with a sibling holding
    /// the same key.
    pub async fn serialize<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        f().await
    }

    /// Drop the lock entry for `key`. Lock entries are small and rarely
    /// contended enough to warrant cleanup, but a caller that knows a key is
    /// permanently dead (e.g. a deleted tenant) can reclaim the slot.
    pub fn forget(&self, key: &str) {
        self.locks.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_misses_on_the_same_key_rebuild_once() {
        let group = SingleflightGroup::new();
        let rebuilds = Arc::new(AtomicUsize::new(0));
        let cached = Arc::new(SyncMutex::new(None::<u32>));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let group = group.clone();
            let rebuilds = rebuilds.clone();
            let cached = cached.clone();
            handles.push(tokio::spawn(async move {
                group
                    .run_or_cached(
                        "contentmap:t1",
                        || *cached.lock(),
                        || {
                            let rebuilds = rebuilds.clone();
                            let cached = cached.clone();
                            async move {
                                rebuilds.fetch_add(1, Ordering::SeqCst);
                                let value = 42;
                                *cached.lock() = Some(value);
                                value
                            }
                        },
                    )
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
        assert_eq!(rebuilds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn serialize_forces_interleaved_callers_to_run_one_at_a_time() {
        let group = SingleflightGroup::new();
        let order = Arc::new(SyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let group = group.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                group
                    .serialize("fingerprint:f1", || async move {
                        order.lock().push(i);
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().len(), 4);
    }

    #[tokio::test]
    async fn different_keys_do_not_serialize_each_other() {
        let group = SingleflightGroup::new();
        let a = group.run_or_cached("a", || None::<u32>, || async { 1 });
        let b = group.run_or_cached("b", || None::<u32>, || async { 2 });
        let (a, b) = tokio::join!(a, b);
        assert_eq!((a, b), (1, 2));
    }
}
