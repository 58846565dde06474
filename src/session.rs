//! Session / Fingerprint Store (spec.md §4.D): resolves the
//! `session -> fingerprint -> held_beliefs` chain, maintains the inverse
//! `fingerprint -> sessions` index, and owns the four data-model types the
//! cache manager stores on its behalf (spec.md §3).

use crate::belief::UserBeliefs;
use crate::cache::TenantCache;
use crate::error::CoreResult;
use crate::ids::{FingerprintId, LeadId, PaneId, SessionId, StoryfragmentId, VisitId};
use crate::repository::Repository;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// The authoritative belief set for a visitor identity (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintState {
    pub fingerprint_id: FingerprintId,
    pub lead_id: Option<LeadId>,
    /// Insertion-ordered values per slug; an empty list must never be
    /// stored (spec.md §3 invariant — deleting the last value removes the
    /// key entirely).
    pub held_beliefs: HashMap<String, Vec<String>>,
    pub last_activity: DateTime<Utc>,
}

impl FingerprintState {
    pub fn new(fingerprint_id: FingerprintId) -> Self {
        Self {
            fingerprint_id,
            lead_id: None,
            held_beliefs: HashMap::new(),
            last_activity: Utc::now(),
        }
    }

    pub fn as_user_beliefs(&self) -> UserBeliefs {
        self.held_beliefs.clone()
    }

    /// `IDENTIFY_AS`/assert-as-value semantics (spec.md §4.G): append if
    /// absent, no duplicates. Returns whether anything changed.
    pub fn append_value(&mut self, slug: &str, value: &str) -> bool {
        let values = self.held_beliefs.entry(slug.to_string()).or_default();
        if values.iter().any(|v| v == value) {
            false
        } else {
            values.push(value.to_string());
            true
        }
    }

    /// `UNSET` semantics (spec.md §4.G): remove the key entirely. No-op if
    /// absent. Returns whether anything changed.
    pub fn unset(&mut self, slug: &str) -> bool {
        self.held_beliefs.remove(slug).is_some()
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// A browser-tab identity (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: SessionId,
    pub fingerprint_id: FingerprintId,
    pub visit_id: VisitId,
    pub lead_id: Option<LeadId>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A bundle of activity for one fingerprint, bounded by a campaign window
/// (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitState {
    pub visit_id: VisitId,
    pub fingerprint_id: FingerprintId,
    pub campaign_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// The resolved belief snapshot for one `(session, storyfragment)` pair at
/// render time (spec.md §3): always equal to the owning fingerprint's
/// `held_beliefs` at the moment of creation, invalidated immediately after
/// a broadcast to that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBeliefContext {
    pub session_id: SessionId,
    pub storyfragment_id: StoryfragmentId,
    pub held_beliefs: HashMap<String, Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl SessionBeliefContext {
    pub fn from_fingerprint(
        session_id: SessionId,
        storyfragment_id: StoryfragmentId,
        fingerprint: &FingerprintState,
    ) -> Self {
        Self {
            session_id,
            storyfragment_id,
            held_beliefs: fingerprint.held_beliefs.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn as_user_beliefs(&self) -> UserBeliefs {
        self.held_beliefs.clone()
    }
}

/// Inputs identifying a visitor across the session-resolution paths listed
/// in spec.md §4.D (fresh visit, cross-tab clone, credential unlock).
#[derive(Debug, Clone)]
pub struct ResolveSessionInput {
    pub session_id: Option<SessionId>,
    pub existing_fingerprint_id: Option<FingerprintId>,
    pub lead_id: Option<LeadId>,
    pub campaign_id: Option<String>,
}

const VISIT_REUSE_WINDOW_HOURS: i64 = 2;

/// Resolve (or create) the full `session -> fingerprint -> visit` chain for
/// one request, following the sequence in spec.md §4.D.
///
/// 1. Resolve a canonical `fingerprint_id` (existing by lead, existing from
///    an old session on clone, otherwise freshly minted).
/// 2. Ensure a current `visit_id`: reuse the latest visit for this
///    fingerprint if less than 2 hours old; else create a new one.
/// 3. On cache miss when a lead is present, load `held_beliefs` from the
///    persistent action log for that fingerprint.
/// 4. Update `SessionData`, `FingerprintState`, and `VisitState` together
///    with the inverse `fingerprint -> sessions` index.
pub async fn resolve_session(
    tenant: &TenantCache,
    repository: &dyn Repository,
    input: ResolveSessionInput,
) -> CoreResult<SessionData> {
    if let Some(session_id) = &input.session_id {
        if let Some(existing) = tenant.get_session(session_id) {
            if !existing.is_expired(Utc::now()) {
                return Ok(existing);
            }
        }
    }

    let fingerprint_id = resolve_fingerprint_id(tenant, repository, &input).await?;
    let mut fingerprint = match tenant.get_fingerprint(&fingerprint_id) {
        Some(existing) => existing,
        None => {
            let mut fresh = FingerprintState::new(fingerprint_id.clone());
            fresh.lead_id = input.lead_id.clone();
            if input.lead_id.is_some() {
                fresh.held_beliefs = repository.load_held_beliefs(&fingerprint_id).await?;
            }
            fresh
        }
    };
    fingerprint.touch();
    tenant.set_fingerprint(fingerprint.clone());

    let visit = ensure_current_visit(tenant, &fingerprint_id, input.campaign_id.clone());

    let now = Utc::now();
    let session = SessionData {
        session_id: input.session_id.unwrap_or_else(SessionId::new),
        fingerprint_id: fingerprint_id.clone(),
        visit_id: visit.visit_id,
        lead_id: input.lead_id,
        created_at: now,
        last_activity: now,
        expires_at: now + ChronoDuration::hours(24),
    };
    tenant.set_session(session.clone());

    Ok(session)
}

async fn resolve_fingerprint_id(
    tenant: &TenantCache,
    repository: &dyn Repository,
    input: &ResolveSessionInput,
) -> CoreResult<FingerprintId> {
    if let Some(lead_id) = &input.lead_id {
        if let Some(found) = repository.fingerprint_for_lead(lead_id).await? {
            return Ok(found);
        }
    }
    if let Some(existing) = &input.existing_fingerprint_id {
        return Ok(existing.clone());
    }
    Ok(FingerprintId::new())
}

fn ensure_current_visit(
    tenant: &TenantCache,
    fingerprint_id: &FingerprintId,
    campaign_id: Option<String>,
) -> VisitState {
    let now = Utc::now();
    if let Some(latest) = tenant.latest_visit_for_fingerprint(fingerprint_id) {
        if now - latest.last_activity < ChronoDuration::hours(VISIT_REUSE_WINDOW_HOURS) {
            return latest;
        }
    }

    let visit = VisitState {
        visit_id: VisitId::new(),
        fingerprint_id: fingerprint_id.clone(),
        campaign_id,
        created_at: now,
        last_activity: now,
    };
    tenant.set_visit(visit.clone());
    visit
}

/// Build (or reuse) the session belief context for a `(session,
/// storyfragment)` pair, loading it from the fingerprint store on miss
/// (spec.md §3 `SessionBeliefContext` lifecycle).
pub fn load_session_context(
    tenant: &Arc<TenantCache>,
    session: &SessionData,
    storyfragment_id: &StoryfragmentId,
) -> Option<SessionBeliefContext> {
    if let Some(ctx) = tenant.get_session_context(&session.session_id, storyfragment_id) {
        return Some(ctx);
    }

    let fingerprint = tenant.get_fingerprint(&session.fingerprint_id)?;
    let ctx = SessionBeliefContext::from_fingerprint(
        session.session_id.clone(),
        storyfragment_id.clone(),
        &fingerprint,
    );
    tenant.set_session_context(session.session_id.clone(), storyfragment_id.clone(), ctx.clone());
    Some(ctx)
}

/// A `PaneId` specifically meant as "a pane whose visibility flipped", used
/// by the broadcaster and SSE payloads instead of the bare id type (spec.md
/// §4.H, §6 `SseEventPayload.affectedPanes`).
pub type AffectedPane = PaneId;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;

    fn tenant() -> Arc<TenantCache> {
        Arc::new(TenantCache::new())
    }

    #[tokio::test]
    async fn resolving_a_fresh_session_mints_a_new_fingerprint_and_visit() {
        let tc = tenant();
        let repo = InMemoryRepository::new();
        let input = ResolveSessionInput {
            session_id: None,
            existing_fingerprint_id: None,
            lead_id: None,
            campaign_id: None,
        };

        let session = resolve_session(&tc, &repo, input).await.unwrap();
        assert!(tc.get_fingerprint(&session.fingerprint_id).is_some());
        assert!(tc.get_visit(&session.visit_id).is_some());
        assert_eq!(tc.sessions_by_fingerprint(&session.fingerprint_id), vec![session.session_id.clone()]);
    }

    #[tokio::test]
    async fn resolving_twice_with_same_session_id_reuses_it() {
        let tc = tenant();
        let repo = InMemoryRepository::new();
        let input = ResolveSessionInput {
            session_id: None,
            existing_fingerprint_id: None,
            lead_id: None,
            campaign_id: None,
        };
        let first = resolve_session(&tc, &repo, input).await.unwrap();

        let input2 = ResolveSessionInput {
            session_id: Some(first.session_id.clone()),
            existing_fingerprint_id: None,
            lead_id: None,
            campaign_id: None,
        };
        let second = resolve_session(&tc, &repo, input2).await.unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.fingerprint_id, second.fingerprint_id);
    }

    #[test]
    fn append_value_is_idempotent() {
        let mut fp = FingerprintState::new(FingerprintId::new());
        assert!(fp.append_value("tier", "pro"));
        assert!(!fp.append_value("tier", "pro"));
        assert_eq!(fp.held_beliefs.get("tier").unwrap(), &vec!["pro".to_string()]);
    }

    #[test]
    fn unset_removes_the_key_entirely() {
        let mut fp = FingerprintState::new(FingerprintId::new());
        fp.append_value("tier", "pro");
        assert!(fp.unset("tier"));
        assert!(!fp.held_beliefs.contains_key("tier"));
        assert!(!fp.unset("tier"));
    }
}
