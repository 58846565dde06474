//! Content-addressed base-HTML cache (spec.md §4.E).

use chrono::{DateTime, Utc};
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// `(belief_mode, sorted_held, sorted_withheld)` — the default variant has
/// empty arrays and `belief_mode = "default"` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    pub belief_mode: String,
    pub held: Vec<String>,
    pub withheld: Vec<String>,
}

impl Variant {
    pub fn default_variant() -> Self {
        Self {
            belief_mode: "default".to_string(),
            held: Vec::new(),
            withheld: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChunkKey {
    pane_id: String,
    variant: Variant,
}

/// A snapshot handed back to callers; the cache itself keeps a mutable
/// `last_read` timestamp alongside this for LRU bookkeeping.
#[derive(Debug, Clone)]
pub struct HtmlChunk {
    pub html: String,
    pub dependencies: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

struct Entry {
    html: String,
    dependencies: Vec<String>,
    generated_at: DateTime<Utc>,
    last_read: SyncMutex<DateTime<Utc>>,
}

/// Reads only ever take the outer map's read lock plus an uncontended
/// per-entry mutex to bump recency — no writer can block a reader of a
/// different key (spec.md §4.E: "reads are lock-free for the common path").
#[derive(Default)]
pub struct HtmlChunkCache {
    entries: RwLock<HashMap<ChunkKey, Arc<Entry>>>,
}

impl HtmlChunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pane_id: &str, variant: &Variant) -> Option<HtmlChunk> {
        let key = ChunkKey {
            pane_id: pane_id.to_string(),
            variant: variant.clone(),
        };
        let entry = self.entries.read().get(&key).cloned()?;
        *entry.last_read.lock() = Utc::now();
        Some(HtmlChunk {
            html: entry.html.clone(),
            dependencies: entry.dependencies.clone(),
            generated_at: entry.generated_at,
        })
    }

    pub fn set(
        &self,
        pane_id: impl Into<String>,
        variant: Variant,
        html: String,
        dependencies: Vec<String>,
    ) {
        let key = ChunkKey {
            pane_id: pane_id.into(),
            variant,
        };
        let now = Utc::now();
        self.entries.write().insert(
            key,
            Arc::new(Entry {
                html,
                dependencies,
                generated_at: now,
                last_read: SyncMutex::new(now),
            }),
        );
    }

    /// Removes every chunk whose dependency list contains `dep_id` (spec.md
    /// §4.C, §8 invariant 6). Returns the number of entries removed.
    pub fn invalidate_by_dependency(&self, dep_id: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.dependencies.iter().any(|d| d == dep_id));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size-based LRU eviction by `last_read` recency (spec.md §4.J): keeps
    /// the `capacity` most recently read entries, evicts the rest.
    pub fn evict_over_capacity(&self, capacity: usize) -> usize {
        let mut entries = self.entries.write();
        if entries.len() <= capacity {
            return 0;
        }

        let mut by_recency: Vec<(ChunkKey, DateTime<Utc>)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), *entry.last_read.lock()))
            .collect();
        by_recency.sort_by_key(|(_, last_read)| *last_read);

        let to_evict = entries.len() - capacity;
        let mut evicted = 0;
        for (key, _) in by_recency.into_iter().take(to_evict) {
            entries.remove(&key);
            evicted += 1;
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let cache = HtmlChunkCache::new();
        let variant = Variant::default_variant();
        cache.set("p1", variant.clone(), "<div/>".to_string(), vec!["p1".to_string()]);

        let chunk = cache.get("p1", &variant).expect("chunk present");
        assert_eq!(chunk.html, "<div/>");
        assert_eq!(chunk.dependencies, vec!["p1".to_string()]);
    }

    #[test]
    fn distinct_variants_are_distinct_entries() {
        let cache = HtmlChunkCache::new();
        let default = Variant::default_variant();
        let personalized = Variant {
            belief_mode: "personalized".to_string(),
            held: vec!["tier:pro".to_string()],
            withheld: Vec::new(),
        };
        cache.set("p1", default.clone(), "base".to_string(), vec!["p1".to_string()]);
        cache.set("p1", personalized.clone(), "personal".to_string(), vec!["p1".to_string()]);

        assert_eq!(cache.get("p1", &default).unwrap().html, "base");
        assert_eq!(cache.get("p1", &personalized).unwrap().html, "personal");
    }

    #[test]
    fn invalidate_by_dependency_removes_every_matching_chunk() {
        let cache = HtmlChunkCache::new();
        let v = Variant::default_variant();
        cache.set("p1", v.clone(), "a".to_string(), vec!["p1".to_string(), "menu1".to_string()]);
        cache.set("p2", v.clone(), "b".to_string(), vec!["p2".to_string()]);

        let removed = cache.invalidate_by_dependency("menu1");
        assert_eq!(removed, 1);
        assert!(cache.get("p1", &v).is_none());
        assert!(cache.get("p2", &v).is_some());
    }

    #[test]
    fn evict_over_capacity_keeps_the_most_recently_read() {
        let cache = HtmlChunkCache::new();
        let v = Variant::default_variant();
        cache.set("old", v.clone(), "a".to_string(), vec!["old".to_string()]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.set("new", v.clone(), "b".to_string(), vec!["new".to_string()]);

        let evicted = cache.evict_over_capacity(1);
        assert_eq!(evicted, 1);
        assert!(cache.get("old", &v).is_none());
        assert!(cache.get("new", &v).is_some());
    }
}
