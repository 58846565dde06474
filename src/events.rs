//! Event Processor (spec.md §4.G): applies belief verbs, persists the
//! action log, and triggers a broadcast when any belief actually changed.

use crate::belief::evaluator;
use crate::broadcast;
use crate::cache::TenantCache;
use crate::dto::{EventBatch, EventInput};
use crate::error::{CoreError, CoreResult};
use crate::ids::{BeliefSlug, PaneId, StoryfragmentId};
use crate::repository::{ActionRecord, Repository};
use crate::session::{FingerprintState, SessionData};
use crate::sse::SseHub;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Pane-by-pane boolean visibility, per storyfragment, at one point in time
/// (spec.md §3, §4.G "visibility snapshot").
pub type VisibilitySnapshot = HashMap<StoryfragmentId, HashMap<PaneId, bool>>;

fn snapshot_visibility(
    tenant: &TenantCache,
    candidate_slugs: &HashSet<BeliefSlug>,
    user_beliefs: &evaluator::UserBeliefs,
) -> VisibilitySnapshot {
    let mut snapshot = VisibilitySnapshot::new();
    if candidate_slugs.is_empty() {
        return snapshot;
    }

    for registry in tenant.registries_snapshot() {
        if registry.required_beliefs.is_disjoint(candidate_slugs) {
            continue;
        }
        let panes = registry
            .pane_predicates
            .iter()
            .map(|(pane_id, predicate)| {
                (pane_id.clone(), evaluator::evaluate(predicate, user_beliefs).is_visible())
            })
            .collect();
        snapshot.insert(registry.storyfragment_id.clone(), panes);
    }
    snapshot
}

/// Applies one belief event to `fingerprint`, resolving the slug against the
/// belief catalog first (spec.md §4.G): an unknown slug is a warning, not a
/// failure, and the event is dropped without touching fingerprint state.
async fn apply_belief_event(
    repository: &dyn Repository,
    fingerprint: &mut FingerprintState,
    event: &EventInput,
) -> CoreResult<bool> {
    if event.id.is_empty() {
        return Err(CoreError::validation("belief event missing id"));
    }
    if repository.resolve_belief_id(&event.id).await?.is_none() {
        tracing::warn!(slug = %event.id, "belief slug not found in catalog, dropping event");
        return Ok(false);
    }
    let changed = match event.verb.as_str() {
        "UNSET" => fingerprint.unset(&event.id),
        "IDENTIFY_AS" => {
            if event.object.is_empty() {
                false
            } else {
                fingerprint.append_value(&event.id, &event.object)
            }
        }
        other => fingerprint.append_value(&event.id, other),
    };
    Ok(changed)
}

async fn record_belief_action(
    repository: &dyn Repository,
    session: &SessionData,
    event: &EventInput,
) -> CoreResult<()> {
    let verb = if event.verb == "IDENTIFY_AS" {
        event.object.clone()
    } else {
        event.verb.clone()
    };
    repository
        .append_action(ActionRecord {
            id: Uuid::new_v4().to_string(),
            object_id: event.id.clone(),
            object_type: "Belief".to_string(),
            verb,
            visit_id: session.visit_id,
            fingerprint_id: session.fingerprint_id,
            duration_ms: None,
            created_at: Utc::now(),
        })
        .await
}

async fn record_pane_action(
    repository: &dyn Repository,
    session: &SessionData,
    event: &EventInput,
) -> CoreResult<()> {
    if !matches!(event.verb.as_str(), "READ" | "GLOSSED" | "CLICKED") {
        return Ok(());
    }
    let duration_ms = event.object.parse::<i64>().ok();
    repository
        .append_action(ActionRecord {
            id: Uuid::new_v4().to_string(),
            object_id: event.id.clone(),
            object_type: "Pane".to_string(),
            verb: event.verb.clone(),
            visit_id: session.visit_id,
            fingerprint_id: session.fingerprint_id,
            duration_ms,
            created_at: Utc::now(),
        })
        .await
}

/// `StoryFragment`/`PAGEVIEWED` (spec.md §4.G): a before-empty vs
/// current-beliefs diff over the storyfragment's registry, broadcast to the
/// triggering session only with no scroll target.
async fn handle_pageviewed(
    tenant: &Arc<TenantCache>,
    hub: &SseHub,
    session: &SessionData,
    storyfragment_id: &str,
) -> CoreResult<()> {
    let current = tenant
        .get_fingerprint(&session.fingerprint_id)
        .map(|fp| fp.as_user_beliefs())
        .unwrap_or_default();

    let affected = broadcast::calculate_belief_diff(
        tenant,
        storyfragment_id,
        &evaluator::UserBeliefs::new(),
        &current,
    );

    if !affected.is_empty() {
        hub.publish(
            tenant,
            &session.session_id,
            storyfragment_id,
            affected,
            None,
        )
        .await;
    }
    Ok(())
}

/// `process_events(tenant, session_id, events[], current_pane, goto_pane)`
/// (spec.md §4.G). A failed mutation aborts the remaining events in the
/// batch (spec.md §7 propagation policy) — analytics-only events (Pane
/// reads, persistence writes) are logged and continue past repository
/// hiccups instead.
pub async fn process_events(
    tenant: &Arc<TenantCache>,
    repository: &dyn Repository,
    hub: &SseHub,
    batch: EventBatch,
) -> CoreResult<Vec<EventInput>> {
    let session = tenant
        .get_session(&batch.session_id)
        .ok_or_else(|| CoreError::not_found(format!("session {}", batch.session_id)))?;

    // Validation happens before any mutation is attempted: a malformed
    // event rejects the whole batch without partial application (spec.md
    // §7), so this has to run before the fingerprint is ever touched.
    for event in &batch.events {
        if event.event_type == "Belief" && event.id.is_empty() {
            return Err(CoreError::validation("belief event missing id"));
        }
    }

    let candidate_slugs: HashSet<BeliefSlug> = batch
        .events
        .iter()
        .filter(|e| e.event_type == "Belief")
        .map(|e| e.id.clone())
        .collect();

    // The whole batch runs under this fingerprint's lock (spec.md §5):
    // concurrent batches for the same fingerprint must serialize their
    // read-modify-write, and the before-mutation snapshot must be taken
    // under the same lock that guards the mutation that follows it.
    let lock_key = session.fingerprint_id.to_string();
    let (snapshot, changed_beliefs) = tenant
        .fingerprint_locks
        .serialize(&lock_key, || async {
            let before_beliefs = tenant
                .get_fingerprint(&session.fingerprint_id)
                .map(|fp| fp.as_user_beliefs())
                .unwrap_or_default();
            let snapshot = snapshot_visibility(tenant, &candidate_slugs, &before_beliefs);

            let mut fingerprint = tenant
                .get_fingerprint(&session.fingerprint_id)
                .unwrap_or_else(|| FingerprintState::new(session.fingerprint_id));
            let mut changed_beliefs = HashSet::new();

            for event in &batch.events {
                match event.event_type.as_str() {
                    "Belief" => {
                        // Empty ids are already validated above; only a
                        // genuine programming bug would fail here.
                        match apply_belief_event(repository, &mut fingerprint, event).await {
                            Ok(changed) if changed => {
                                changed_beliefs.insert(event.id.clone());
                                if let Err(err) = record_belief_action(repository, &session, event).await {
                                    tracing::warn!(error = %err, "failed to persist belief action");
                                }
                            }
                            Ok(_) => {}
                            Err(err) => tracing::error!(error = %err, "belief event failed post-validation"),
                        }
                    }
                    "Pane" => {
                        if let Err(err) = record_pane_action(repository, &session, event).await {
                            tracing::warn!(error = %err, "failed to persist pane action, continuing batch");
                        }
                    }
                    "StoryFragment" if event.verb == "PAGEVIEWED" => {
                        if let Err(err) = handle_pageviewed(tenant, hub, &session, &event.id).await {
                            tracing::warn!(error = %err, "PAGEVIEWED diff/broadcast failed");
                        }
                    }
                    other => {
                        tracing::warn!(event_type = %other, verb = %event.verb, "ignoring unrecognized event");
                    }
                }
            }

            if !changed_beliefs.is_empty() {
                fingerprint.touch();
            }
            tenant.set_fingerprint(fingerprint);

            (snapshot, changed_beliefs)
        })
        .await;

    if !changed_beliefs.is_empty() {
        broadcast::broadcast(
            tenant,
            hub,
            &session.session_id,
            &changed_beliefs,
            &snapshot,
            batch.current_pane.as_deref(),
            batch.goto_pane.as_deref(),
        )
        .await;
    }

    Ok(batch.events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ids::{FingerprintId, SessionId, VisitId};
    use crate::repository::InMemoryRepository;
    use chrono::Duration;

    fn tenant_with_session() -> (Arc<TenantCache>, SessionData) {
        let tenant = Arc::new(TenantCache::new());
        let fingerprint_id = FingerprintId::new();
        tenant.set_fingerprint(FingerprintState::new(fingerprint_id));
        let now = Utc::now();
        let session = SessionData {
            session_id: SessionId::new(),
            fingerprint_id,
            visit_id: VisitId::new(),
            lead_id: None,
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::hours(24),
        };
        tenant.set_session(session.clone());
        (tenant, session)
    }

    fn hub() -> SseHub {
        SseHub::new(Config::default().sse_channel_capacity)
    }

    #[tokio::test]
    async fn unset_verb_removes_the_belief_and_marks_it_changed() {
        let (tenant, session) = tenant_with_session();
        let mut fp = tenant.get_fingerprint(&session.fingerprint_id).unwrap();
        fp.append_value("tier", "pro");
        tenant.set_fingerprint(fp);

        let repo = InMemoryRepository::new();
        repo.register_belief("tier", "belief-tier");
        let batch = EventBatch {
            tenant: "t1".to_string(),
            session_id: session.session_id.clone(),
            events: vec![EventInput {
                id: "tier".to_string(),
                event_type: "Belief".to_string(),
                verb: "UNSET".to_string(),
                object: String::new(),
            }],
            current_pane: None,
            goto_pane: None,
        };

        process_events(&tenant, &repo, &hub(), batch).await.unwrap();
        let fp = tenant.get_fingerprint(&session.fingerprint_id).unwrap();
        assert!(!fp.held_beliefs.contains_key("tier"));
    }

    #[tokio::test]
    async fn identify_as_appends_the_object_value() {
        let (tenant, session) = tenant_with_session();
        let repo = InMemoryRepository::new();
        repo.register_belief("lang", "belief-lang");
        let batch = EventBatch {
            tenant: "t1".to_string(),
            session_id: session.session_id.clone(),
            events: vec![EventInput {
                id: "lang".to_string(),
                event_type: "Belief".to_string(),
                verb: "IDENTIFY_AS".to_string(),
                object: "en".to_string(),
            }],
            current_pane: None,
            goto_pane: None,
        };

        process_events(&tenant, &repo, &hub(), batch).await.unwrap();
        let fp = tenant.get_fingerprint(&session.fingerprint_id).unwrap();
        assert_eq!(fp.held_beliefs.get("lang"), Some(&vec!["en".to_string()]));
    }

    #[tokio::test]
    async fn pane_event_is_a_no_op_for_beliefs() {
        let (tenant, session) = tenant_with_session();
        let repo = InMemoryRepository::new();
        let batch = EventBatch {
            tenant: "t1".to_string(),
            session_id: session.session_id.clone(),
            events: vec![EventInput {
                id: "p1".to_string(),
                event_type: "Pane".to_string(),
                verb: "READ".to_string(),
                object: "1500".to_string(),
            }],
            current_pane: None,
            goto_pane: None,
        };

        process_events(&tenant, &repo, &hub(), batch).await.unwrap();
        let fp = tenant.get_fingerprint(&session.fingerprint_id).unwrap();
        assert!(fp.held_beliefs.is_empty());
    }

    #[tokio::test]
    async fn missing_belief_id_aborts_the_remaining_batch() {
        let (tenant, session) = tenant_with_session();
        let repo = InMemoryRepository::new();
        let batch = EventBatch {
            tenant: "t1".to_string(),
            session_id: session.session_id.clone(),
            events: vec![
                EventInput {
                    id: String::new(),
                    event_type: "Belief".to_string(),
                    verb: "SOMETHING".to_string(),
                    object: String::new(),
                },
                EventInput {
                    id: "lang".to_string(),
                    event_type: "Belief".to_string(),
                    verb: "IDENTIFY_AS".to_string(),
                    object: "en".to_string(),
                },
            ],
            current_pane: None,
            goto_pane: None,
        };

        let result = process_events(&tenant, &repo, &hub(), batch).await;
        assert!(result.is_err());
        let fp = tenant.get_fingerprint(&session.fingerprint_id).unwrap();
        assert!(!fp.held_beliefs.contains_key("lang"));
    }

    #[tokio::test]
    async fn a_slug_not_in_the_belief_catalog_is_dropped_without_erroring() {
        let (tenant, session) = tenant_with_session();
        let repo = InMemoryRepository::new();
        let batch = EventBatch {
            tenant: "t1".to_string(),
            session_id: session.session_id.clone(),
            events: vec![EventInput {
                id: "unknown-slug".to_string(),
                event_type: "Belief".to_string(),
                verb: "IDENTIFY_AS".to_string(),
                object: "anything".to_string(),
            }],
            current_pane: None,
            goto_pane: None,
        };

        process_events(&tenant, &repo, &hub(), batch).await.unwrap();
        let fp = tenant.get_fingerprint(&session.fingerprint_id).unwrap();
        assert!(!fp.held_beliefs.contains_key("unknown-slug"));
    }
}
