//! Per-Tenant Cache Manager (spec.md §4.C): namespaced in-memory stores
//! with surgical invalidation, generalizing `middleware::rate_limit`'s
//! `Arc<parking_lot::Mutex<HashMap<...>>>` pattern across every entity kind
//! the core needs to cache.

pub mod content;
pub mod html_chunk;
pub mod singleflight;

pub use content::{ContentCache, ContentKind};
pub use html_chunk::{HtmlChunk, HtmlChunkCache, Variant};
pub use singleflight::SingleflightGroup;

use crate::belief::StoryfragmentBeliefRegistry;
use crate::ids::{FingerprintId, SessionId, StoryfragmentId, TenantId, VisitId};
use crate::session::{FingerprintState, SessionBeliefContext, SessionData, VisitState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Everything cached for one tenant (spec.md §4.C).
#[derive(Default)]
pub struct TenantCache {
    /// Set by `CacheManager::initialize_tenant`; empty for a bare
    /// `TenantCache::new()` as used throughout this crate's unit tests. The
    /// SSE hub uses it to namespace subscriptions across tenants whose
    /// storyfragment ids might otherwise collide.
    pub tenant_id: TenantId,
    pub content: ContentCache,
    pub html_chunks: HtmlChunkCache,
    registries: RwLock<HashMap<StoryfragmentId, StoryfragmentBeliefRegistry>>,
    session_contexts: RwLock<HashMap<(SessionId, StoryfragmentId), SessionBeliefContext>>,
    sessions: RwLock<HashMap<SessionId, SessionData>>,
    fingerprints: RwLock<HashMap<FingerprintId, FingerprintState>>,
    visits: RwLock<HashMap<VisitId, VisitState>>,
    fingerprint_sessions: RwLock<HashMap<FingerprintId, HashSet<SessionId>>>,
    pub rebuilds: SingleflightGroup,
    /// Per-fingerprint write serialization (spec.md §5): belief mutations
    /// for the same fingerprint across concurrent batches must not
    /// interleave as a read-modify-write race.
    pub fingerprint_locks: SingleflightGroup,
}

impl TenantCache {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Belief registries --------------------------------------------

    pub fn get_registry(&self, storyfragment_id: &str) -> Option<StoryfragmentBeliefRegistry> {
        self.registries.read().get(storyfragment_id).cloned()
    }

    pub fn set_registry(&self, registry: StoryfragmentBeliefRegistry) {
        self.registries
            .write()
            .insert(registry.storyfragment_id.clone(), registry);
    }

    pub fn invalidate_registry(&self, storyfragment_id: &str) {
        self.registries.write().remove(storyfragment_id);
    }

    /// A snapshot of every registry currently cached for this tenant (used
    /// by the event processor's pre-mutation visibility snapshot and the
    /// broadcaster's affected-storyfragment scan, spec.md §4.G, §4.H).
    pub fn registries_snapshot(&self) -> Vec<StoryfragmentBeliefRegistry> {
        self.registries.read().values().cloned().collect()
    }

    // -- Session belief contexts ---------------------------------------

    pub fn get_session_context(
        &self,
        session_id: &SessionId,
        storyfragment_id: &str,
    ) -> Option<SessionBeliefContext> {
        self.session_contexts
            .read()
            .get(&(session_id.clone(), storyfragment_id.to_string()))
            .cloned()
    }

    pub fn set_session_context(
        &self,
        session_id: SessionId,
        storyfragment_id: StoryfragmentId,
        context: SessionBeliefContext,
    ) {
        self.session_contexts
            .write()
            .insert((session_id, storyfragment_id), context);
    }

    pub fn invalidate_session_context(&self, session_id: &SessionId, storyfragment_id: &str) {
        self.session_contexts
            .write()
            .remove(&(session_id.clone(), storyfragment_id.to_string()));
    }

    // -- Sessions / fingerprints / visits --------------------------------

    pub fn get_session(&self, session_id: &SessionId) -> Option<SessionData> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn set_session(&self, session: SessionData) {
        let fingerprint_id = session.fingerprint_id.clone();
        let session_id = session.session_id.clone();
        self.sessions.write().insert(session_id.clone(), session);
        self.fingerprint_sessions
            .write()
            .entry(fingerprint_id)
            .or_default()
            .insert(session_id);
    }

    pub fn remove_session(&self, session_id: &SessionId) {
        let removed = self.sessions.write().remove(session_id);
        if let Some(session) = removed {
            if let Some(set) = self
                .fingerprint_sessions
                .write()
                .get_mut(&session.fingerprint_id)
            {
                set.remove(session_id);
            }
        }
    }

    /// `get_sessions_by_fingerprint`, O(1) via the maintained inverse index
    /// (spec.md §4.C, §8 invariant 7).
    pub fn sessions_by_fingerprint(&self, fingerprint_id: &FingerprintId) -> Vec<SessionId> {
        self.fingerprint_sessions
            .read()
            .get(fingerprint_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_fingerprint(&self, fingerprint_id: &FingerprintId) -> Option<FingerprintState> {
        self.fingerprints.read().get(fingerprint_id).cloned()
    }

    pub fn set_fingerprint(&self, state: FingerprintState) {
        self.fingerprints
            .write()
            .insert(state.fingerprint_id.clone(), state);
    }

    pub fn get_visit(&self, visit_id: &VisitId) -> Option<VisitState> {
        self.visits.read().get(visit_id).cloned()
    }

    pub fn set_visit(&self, visit: VisitState) {
        self.visits.write().insert(visit.visit_id.clone(), visit);
    }

    /// The most recently active visit for a fingerprint, if any (spec.md
    /// §4.D.2 reuse check).
    pub fn latest_visit_for_fingerprint(&self, fingerprint_id: &FingerprintId) -> Option<VisitState> {
        self.visits
            .read()
            .values()
            .filter(|v| &v.fingerprint_id == fingerprint_id)
            .max_by_key(|v| v.last_activity)
            .cloned()
    }

    pub fn all_session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn all_fingerprint_ids(&self) -> Vec<FingerprintId> {
        self.fingerprints.read().keys().cloned().collect()
    }

    // -- Cross-cutting invalidation --------------------------------------

    /// Mutating a pane invalidates every HTML chunk that depends on it,
    /// every belief registry of a storyfragment containing it, and every
    /// session context for those storyfragments (spec.md §4.C invariant).
    pub fn invalidate_pane(&self, pane_id: &str) {
        self.content.invalidate(ContentKind::Pane, pane_id);
        self.html_chunks.invalidate_by_dependency(pane_id);

        let affected: Vec<StoryfragmentId> = self
            .registries
            .read()
            .iter()
            .filter(|(_, registry)| {
                registry.pane_predicates.contains_key(pane_id)
                    || registry.pane_widget_beliefs.iter().any(|(id, _)| id == pane_id)
            })
            .map(|(id, _)| id.clone())
            .collect();

        if affected.is_empty() {
            return;
        }

        {
            let mut registries = self.registries.write();
            for sf in &affected {
                registries.remove(sf);
            }
        }
        self.session_contexts
            .write()
            .retain(|(_, sf), _| !affected.contains(sf));
    }

    // -- Cleanup worker bulk operations (spec.md §4.J) -------------------

    pub fn evict_expired_sessions(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.session_id.clone())
            .collect();
        for session_id in &expired {
            self.remove_session(session_id);
        }
        expired.len()
    }

    pub fn evict_idle_visits(&self, cutoff: DateTime<Utc>) -> usize {
        let mut visits = self.visits.write();
        let before = visits.len();
        visits.retain(|_, v| v.last_activity >= cutoff);
        before - visits.len()
    }

    /// Evicts fingerprints idle beyond `cutoff` AND with no live sessions
    /// (spec.md §4.J — a fingerprint with an active tab is never evicted
    /// regardless of its own idle timer).
    pub fn evict_idle_fingerprints(&self, cutoff: DateTime<Utc>) -> usize {
        let idle: Vec<FingerprintId> = self
            .fingerprints
            .read()
            .values()
            .filter(|fp| fp.last_activity < cutoff)
            .map(|fp| fp.fingerprint_id.clone())
            .filter(|id| self.sessions_by_fingerprint(id).is_empty())
            .collect();

        let mut fingerprints = self.fingerprints.write();
        let mut fingerprint_sessions = self.fingerprint_sessions.write();
        for id in &idle {
            fingerprints.remove(id);
            fingerprint_sessions.remove(id);
        }
        idle.len()
    }

    /// Evicts `SessionBeliefContext` entries for sessions that no longer
    /// exist (spec.md §4.J).
    pub fn prune_vanished_session_contexts(&self) -> usize {
        let sessions = self.sessions.read();
        let mut contexts = self.session_contexts.write();
        let before = contexts.len();
        contexts.retain(|(session_id, _), _| sessions.contains_key(session_id));
        before - contexts.len()
    }
}

/// Cross-tenant registry of `TenantCache`s (spec.md §4.C "Cross-tenant"
/// operations).
#[derive(Clone, Default)]
pub struct CacheManager {
    tenants: Arc<RwLock<HashMap<TenantId, Arc<TenantCache>>>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize_tenant(&self, tenant_id: &str) -> Arc<TenantCache> {
        self.tenants
            .write()
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                Arc::new(TenantCache {
                    tenant_id: tenant_id.to_string(),
                    ..TenantCache::new()
                })
            })
            .clone()
    }

    pub fn tenant(&self, tenant_id: &str) -> Option<Arc<TenantCache>> {
        self.tenants.read().get(tenant_id).cloned()
    }

    pub fn active_tenant_ids(&self) -> Vec<TenantId> {
        self.tenants.read().keys().cloned().collect()
    }

    pub fn get_all_session_ids(&self) -> Vec<(TenantId, SessionId)> {
        self.tenants
            .read()
            .iter()
            .flat_map(|(tenant_id, tenant)| {
                tenant
                    .all_session_ids()
                    .into_iter()
                    .map(move |sid| (tenant_id.clone(), sid))
            })
            .collect()
    }

    pub fn get_all_fingerprint_ids(&self) -> Vec<(TenantId, FingerprintId)> {
        self.tenants
            .read()
            .iter()
            .flat_map(|(tenant_id, tenant)| {
                tenant
                    .all_fingerprint_ids()
                    .into_iter()
                    .map(move |fid| (tenant_id.clone(), fid))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::{build_registry, PaneDefinition};
    use chrono::Duration;

    #[test]
    fn invalidate_pane_cascades_to_registries_and_contexts() {
        let tenant = TenantCache::new();
        let pane = PaneDefinition {
            pane_id: "p1".to_string(),
            held_beliefs: serde_json::json!({"tier": ["pro"]}),
            withheld_beliefs: serde_json::json!({}),
            options_payload: serde_json::json!({}),
        };
        let registry = build_registry("sf1".to_string(), &[pane]);
        tenant.set_registry(registry);
        tenant.set_session_context(
            SessionId::new(),
            "sf1".to_string(),
            SessionBeliefContext {
                session_id: SessionId::new(),
                storyfragment_id: "sf1".to_string(),
                held_beliefs: HashMap::new(),
                created_at: Utc::now(),
            },
        );

        tenant.invalidate_pane("p1");
        assert!(tenant.get_registry("sf1").is_none());
        assert!(tenant.session_contexts.read().is_empty());
    }

    #[test]
    fn fingerprint_session_inverse_index_stays_coherent() {
        let tenant = TenantCache::new();
        let fingerprint_id = FingerprintId::new();
        let session = SessionData {
            session_id: SessionId::new(),
            fingerprint_id: fingerprint_id.clone(),
            visit_id: VisitId::new(),
            lead_id: None,
            created_at: Utc::now(),
            last_activity: Utc::now(),
            expires_at: Utc::now() + Duration::hours(24),
        };
        tenant.set_session(session.clone());
        assert_eq!(
            tenant.sessions_by_fingerprint(&fingerprint_id),
            vec![session.session_id.clone()]
        );

        tenant.remove_session(&session.session_id);
        assert!(tenant.sessions_by_fingerprint(&fingerprint_id).is_empty());
    }

    #[test]
    fn evict_idle_fingerprints_spares_those_with_live_sessions() {
        let tenant = TenantCache::new();
        let fingerprint_id = FingerprintId::new();
        let mut fp = FingerprintState::new(fingerprint_id.clone());
        fp.last_activity = Utc::now() - Duration::days(60);
        tenant.set_fingerprint(fp);
        tenant.set_session(SessionData {
            session_id: SessionId::new(),
            fingerprint_id: fingerprint_id.clone(),
            visit_id: VisitId::new(),
            lead_id: None,
            created_at: Utc::now(),
            last_activity: Utc::now(),
            expires_at: Utc::now() + Duration::hours(24),
        });

        let evicted = tenant.evict_idle_fingerprints(Utc::now() - Duration::days(30));
        assert_eq!(evicted, 0);
        assert!(tenant.get_fingerprint(&fingerprint_id).is_some());
    }
}
