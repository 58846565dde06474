//! Namespaced per-tenant content stores (spec.md §4.C). Content payloads
//! are owned by an external CRUD layer (out of scope, spec.md §1); this
//! cache only tracks the last-known blob per id plus the master id list the
//! site-builder enumerates from.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// The seven content kinds the cache manager tracks (spec.md §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Pane,
    Storyfragment,
    TractStack,
    Menu,
    Epinet,
    File,
    Belief,
}

impl ContentKind {
    pub const ALL: [ContentKind; 7] = [
        ContentKind::Pane,
        ContentKind::Storyfragment,
        ContentKind::TractStack,
        ContentKind::Menu,
        ContentKind::Epinet,
        ContentKind::File,
        ContentKind::Belief,
    ];
}

#[derive(Default)]
struct ContentStore {
    items: HashMap<String, Value>,
    ids: Vec<String>,
}

impl ContentStore {
    fn set(&mut self, id: String, value: Value) {
        if !self.items.contains_key(&id) {
            self.ids.push(id.clone());
        }
        self.items.insert(id, value);
    }

    fn invalidate(&mut self, id: &str) -> bool {
        self.ids.retain(|existing| existing != id);
        self.items.remove(id).is_some()
    }

    fn add_id(&mut self, id: String) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    fn remove_id(&mut self, id: &str) {
        self.ids.retain(|existing| existing != id);
        self.items.remove(id);
    }
}

/// One tenant's set of content stores, one per `ContentKind`. The master id
/// list and the item map are kept coherent by construction: every mutating
/// method updates both (spec.md §4.C invariant).
pub struct ContentCache {
    stores: HashMap<ContentKind, RwLock<ContentStore>>,
}

impl Default for ContentCache {
    fn default() -> Self {
        let stores = ContentKind::ALL
            .into_iter()
            .map(|kind| (kind, RwLock::new(ContentStore::default())))
            .collect();
        Self { stores }
    }
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, kind: ContentKind) -> &RwLock<ContentStore> {
        self.stores
            .get(&kind)
            .expect("ContentKind::ALL enumerates every variant")
    }

    pub fn get(&self, kind: ContentKind, id: &str) -> Option<Value> {
        self.store(kind).read().items.get(id).cloned()
    }

    pub fn set(&self, kind: ContentKind, id: impl Into<String>, value: Value) {
        self.store(kind).write().set(id.into(), value);
    }

    /// Removes the item and its id together (spec.md §4.C: a removed id
    /// implies the item is evicted).
    pub fn invalidate(&self, kind: ContentKind, id: &str) -> bool {
        self.store(kind).write().invalidate(id)
    }

    /// A consistent snapshot of every id currently tracked for `kind`.
    pub fn ids(&self, kind: ContentKind) -> Vec<String> {
        self.store(kind).read().ids.clone()
    }

    pub fn add_id(&self, kind: ContentKind, id: impl Into<String>) {
        self.store(kind).write().add_id(id.into());
    }

    pub fn remove_id(&self, kind: ContentKind, id: &str) {
        self.store(kind).write().remove_id(id);
    }
}
