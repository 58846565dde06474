//! Warmer + Cleanup Worker (spec.md §4.J): a boot-time per-tenant warm
//! sequence and a fixed-tick background sweep over the cache manager's
//! eviction methods. Both run as `tokio::spawn`ed tasks the way `main.rs`
//! spawns its periodic collectors.

use crate::cache::{CacheManager, ContentKind, TenantCache};
use crate::fragment;
use crate::ids::{FingerprintId, SessionId, VisitId};
use crate::session::SessionData;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Well-known id of a tenant's single `TractStack` root record, which is
/// where the home storyfragment id lives.
const TRACTSTACK_ROOT_ID: &str = "default";

fn home_storyfragment_id(tenant: &TenantCache) -> Option<String> {
    tenant
        .content
        .get(ContentKind::TractStack, TRACTSTACK_ROOT_ID)?
        .get("homeStoryfragmentId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// A throwaway session used only to drive `fragment::generate`'s
/// cache-population path; it is never written to the tenant's session
/// store, so an anonymous render of the home storyfragment never fabricates
/// a visible visitor.
fn warm_session() -> SessionData {
    let now = Utc::now();
    SessionData {
        session_id: SessionId::new(),
        fingerprint_id: FingerprintId::new(),
        visit_id: VisitId::new(),
        lead_id: None,
        created_at: now,
        last_activity: now,
        expires_at: now,
    }
}

/// Warms one tenant: content map -> belief catalog -> home storyfragment
/// registry -> home-storyfragment pane base HTMLs. Each stage is
/// independent; a failure only stops that tenant's remaining stages (spec.md
/// §4.J, §5 "a warming step for one tenant must not hold a global lock
/// while doing I/O").
pub async fn warm_tenant(tenant: &Arc<TenantCache>) {
    let tenant_id = tenant.tenant_id.clone();

    let panes = tenant.content.ids(ContentKind::Pane).len();
    let storyfragments = tenant.content.ids(ContentKind::Storyfragment).len();
    tracing::info!(tenant = %tenant_id, panes, storyfragments, "content map warm check complete");

    let beliefs = tenant.content.ids(ContentKind::Belief).len();
    tracing::info!(tenant = %tenant_id, beliefs, "belief catalog warm check complete");

    let Some(home_id) = home_storyfragment_id(tenant) else {
        tracing::warn!(tenant = %tenant_id, "no home storyfragment configured, skipping registry and pane warm");
        return;
    };

    let Some(sf_value) = tenant.content.get(ContentKind::Storyfragment, &home_id) else {
        tracing::warn!(tenant = %tenant_id, storyfragment = %home_id, "home storyfragment missing from content map");
        return;
    };
    let pane_ids = fragment::storyfragment_pane_ids(&sf_value);

    let session = warm_session();
    let results = fragment::generate_batch(tenant, &pane_ids, &session, &home_id).await;
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    tracing::info!(
        tenant = %tenant_id,
        storyfragment = %home_id,
        warmed = results.len() - failed,
        failed,
        "home storyfragment pane warm complete"
    );
}

/// Warms every tenant currently registered with the cache manager. Run once
/// at boot; a tenant registered later is warmed lazily by the ordinary
/// request path instead.
pub async fn warm_all_tenants(cache: &CacheManager) {
    for tenant_id in cache.active_tenant_ids() {
        if let Some(tenant) = cache.tenant(&tenant_id) {
            warm_tenant(&tenant).await;
        }
    }
}

/// One pass of the fixed-tick cleanup sweep (spec.md §4.J), factored out of
/// the loop so tests can drive a single tick deterministically.
fn sweep_tenant(tenant: &Arc<TenantCache>, visit_cutoff: chrono::DateTime<Utc>, fingerprint_cutoff: chrono::DateTime<Utc>, html_chunk_cache_capacity: usize) {
    let now = Utc::now();
    let sessions = tenant.evict_expired_sessions(now);
    let visits = tenant.evict_idle_visits(visit_cutoff);
    let fingerprints = tenant.evict_idle_fingerprints(fingerprint_cutoff);
    let contexts = tenant.prune_vanished_session_contexts();
    let chunks = tenant.html_chunks.evict_over_capacity(html_chunk_cache_capacity);

    tracing::debug!(
        tenant = %tenant.tenant_id,
        sessions, visits, fingerprints, contexts, chunks,
        "cleanup sweep complete"
    );
}

/// Runs the cleanup worker until cancelled. Intended to be `tokio::spawn`ed
/// once at boot alongside the warmer.
pub async fn run_cleanup_worker(
    cache: CacheManager,
    tick: Duration,
    visit_ttl: Duration,
    fingerprint_idle_ttl: Duration,
    html_chunk_cache_capacity: usize,
) {
    let visit_ttl = chrono::Duration::from_std(visit_ttl).unwrap_or(chrono::Duration::hours(2));
    let fingerprint_idle_ttl =
        chrono::Duration::from_std(fingerprint_idle_ttl).unwrap_or(chrono::Duration::days(30));

    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let now = Utc::now();
        let visit_cutoff = now - visit_ttl;
        let fingerprint_cutoff = now - fingerprint_idle_ttl;

        for tenant_id in cache.active_tenant_ids() {
            if let Some(tenant) = cache.tenant(&tenant_id) {
                sweep_tenant(&tenant, visit_cutoff, fingerprint_cutoff, html_chunk_cache_capacity);
            }
        }
    }
}
