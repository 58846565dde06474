//! Broadcast Service (spec.md §4.H): fans a belief change out to every
//! live session sharing the triggering session's fingerprint, diffing each
//! affected storyfragment's pane visibility before vs. after the mutation.

use crate::belief::{evaluate, UserBeliefs};
use crate::cache::{ContentKind, TenantCache};
use crate::events::VisibilitySnapshot;
use crate::fragment;
use crate::ids::{BeliefSlug, PaneId, SessionId, StoryfragmentId};
use crate::session::AffectedPane;
use crate::sse::SseHub;
use std::collections::HashSet;
use std::sync::Arc;

/// The storyfragment's pane order as declared by its content (spec.md §3
/// `paneIds`), used only to pick a deterministic "first newly revealed
/// pane" for the scroll target. Falls back to registry iteration order
/// when the storyfragment content isn't cached, which is rare and only
/// affects which pane is chosen as the scroll target, not correctness of
/// the affected-panes set itself.
fn ordered_pane_ids(tenant: &TenantCache, storyfragment_id: &str) -> Vec<PaneId> {
    tenant
        .content
        .get(ContentKind::Storyfragment, storyfragment_id)
        .map(|value| fragment::storyfragment_pane_ids(&value))
        .unwrap_or_default()
}

/// `calculate_belief_diff(tenant, storyfragment, before, after) ->
/// affected_panes` (spec.md §4.H): evaluate every pane predicate twice,
/// return those whose visibility flipped.
pub fn calculate_belief_diff(
    tenant: &TenantCache,
    storyfragment_id: &str,
    before: &UserBeliefs,
    after: &UserBeliefs,
) -> Vec<AffectedPane> {
    let Some(registry) = tenant.get_registry(storyfragment_id) else {
        return Vec::new();
    };

    let order = ordered_pane_ids(tenant, storyfragment_id);
    let mut flipped: Vec<AffectedPane> = order
        .into_iter()
        .filter(|pane_id| registry.pane_predicates.contains_key(pane_id))
        .filter(|pane_id| {
            let predicate = &registry.pane_predicates[pane_id];
            evaluate(predicate, before) != evaluate(predicate, after)
        })
        .collect();

    // Panes the ordered list missed (storyfragment content not cached) are
    // still reported, just appended in registry iteration order.
    for (pane_id, predicate) in &registry.pane_predicates {
        if !flipped.contains(pane_id) && evaluate(predicate, before) != evaluate(predicate, after) {
            flipped.push(pane_id.clone());
        }
    }

    flipped
}

struct AffectedStoryfragment {
    storyfragment_id: StoryfragmentId,
    affected_panes: Vec<AffectedPane>,
    newly_revealed: Option<PaneId>,
}

fn diff_storyfragment(
    tenant: &TenantCache,
    storyfragment_id: &StoryfragmentId,
    snapshot: &VisibilitySnapshot,
    after: &UserBeliefs,
) -> Option<AffectedStoryfragment> {
    let registry = tenant.get_registry(storyfragment_id)?;
    let before_map = snapshot.get(storyfragment_id);
    let order = ordered_pane_ids(tenant, storyfragment_id);
    let fallback_order: Vec<PaneId> = registry.pane_predicates.keys().cloned().collect();
    let iter_order = if order.is_empty() { &fallback_order } else { &order };

    let mut affected_panes = Vec::new();
    let mut newly_revealed = None;

    for pane_id in iter_order {
        let Some(predicate) = registry.pane_predicates.get(pane_id) else {
            continue;
        };
        let after_visible = evaluate(predicate, after).is_visible();
        let before_visible = before_map.and_then(|m| m.get(pane_id)).copied().unwrap_or(false);

        if after_visible != before_visible {
            affected_panes.push(pane_id.clone());
            if newly_revealed.is_none() && !before_visible && after_visible {
                newly_revealed = Some(pane_id.clone());
            }
        }
    }

    if affected_panes.is_empty() {
        None
    } else {
        Some(AffectedStoryfragment {
            storyfragment_id: storyfragment_id.clone(),
            affected_panes,
            newly_revealed,
        })
    }
}

fn storyfragment_for_pane(tenant: &TenantCache, pane_id: &str) -> Option<StoryfragmentId> {
    tenant.content.ids(ContentKind::Storyfragment).into_iter().find(|sf_id| {
        tenant
            .content
            .get(ContentKind::Storyfragment, sf_id)
            .map(|value| fragment::storyfragment_pane_ids(&value).iter().any(|p| p == pane_id))
            .unwrap_or(false)
    })
}

/// `broadcast(tenant, triggering_session, changed_beliefs, snapshot,
/// current_pane, goto_pane)` (spec.md §4.H).
pub async fn broadcast(
    tenant: &Arc<TenantCache>,
    hub: &SseHub,
    triggering_session: &SessionId,
    changed_beliefs: &HashSet<BeliefSlug>,
    snapshot: &VisibilitySnapshot,
    current_pane: Option<&str>,
    goto_pane: Option<&str>,
) {
    let Some(trigger) = tenant.get_session(triggering_session) else {
        return;
    };
    let after = tenant
        .get_fingerprint(&trigger.fingerprint_id)
        .map(|fp| fp.as_user_beliefs())
        .unwrap_or_default();

    let target_sessions = tenant.sessions_by_fingerprint(&trigger.fingerprint_id);
    let current_pane_storyfragment = current_pane.and_then(|p| storyfragment_for_pane(tenant, p));

    let affected: Vec<AffectedStoryfragment> = tenant
        .registries_snapshot()
        .into_iter()
        .filter(|registry| registry.intersects(changed_beliefs))
        .filter_map(|registry| diff_storyfragment(tenant, &registry.storyfragment_id, snapshot, &after))
        .collect();

    for target_session in &target_sessions {
        for item in &affected {
            let scroll_target = if target_session == triggering_session
                && current_pane_storyfragment.as_ref() == Some(&item.storyfragment_id)
                && goto_pane.unwrap_or("").is_empty()
            {
                item.newly_revealed.clone()
            } else if let Some(goto) = goto_pane.filter(|g| !g.is_empty()) {
                Some(goto.to_string())
            } else {
                None
            };

            hub.publish(
                tenant,
                target_session,
                &item.storyfragment_id,
                item.affected_panes.clone(),
                scroll_target,
            )
            .await;
            tenant.invalidate_session_context(target_session, &item.storyfragment_id);
        }
    }
}
