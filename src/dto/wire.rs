//! Wire-level request/response shapes (spec.md §6). Routing itself is an
//! external collaborator; this module only fixes the JSON contracts that
//! cross the HTTP boundary.

use crate::ids::{BeliefSlug, PaneId, SessionId, StoryfragmentId, TenantId};
use crate::session::AffectedPane;
use serde::{Deserialize, Serialize};

/// Inbound — render a pane fragment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPaneRequest {
    pub tenant: TenantId,
    pub session_id: SessionId,
    pub storyfragment_id: StoryfragmentId,
    pub pane_id: PaneId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPaneResponse {
    pub html: String,
}

/// One belief/pane/storyfragment event as posted by a client (spec.md
/// §4.G, §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub verb: String,
    #[serde(default)]
    pub object: String,
}

/// Inbound — state update (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateRequest {
    pub session_id: SessionId,
    #[serde(default)]
    pub events: Vec<EventInput>,
    /// CSV of belief ids/slugs; triggers a bulk UNSET when present.
    #[serde(default)]
    pub unset_belief_ids: Option<String>,
    #[serde(default)]
    pub current_pane_id: Option<PaneId>,
    #[serde(default)]
    pub goto_pane_id: Option<PaneId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateResponse {
    pub status: String,
    pub events: Vec<EventInput>,
}

/// Outbound — SSE event payload (spec.md §6, literal shape).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SseEventPayload {
    pub storyfragment_id: StoryfragmentId,
    pub affected_panes: Vec<AffectedPane>,
    pub goto_pane_id: Option<PaneId>,
}

/// `{tenant, session_id, events[], current_pane, goto_pane}` — the batch
/// form consumed by the event processor (spec.md §4.G), distinct from
/// `StateUpdateRequest` in that it always carries a resolved tenant and
/// never a CSV shorthand; the HTTP layer normalizes both inbound shapes
/// into this one before calling into the core.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub tenant: TenantId,
    pub session_id: SessionId,
    pub events: Vec<EventInput>,
    pub current_pane: Option<PaneId>,
    pub goto_pane: Option<PaneId>,
}

impl StateUpdateRequest {
    /// Normalize the CSV `unset_belief_ids` shorthand into ordinary
    /// `Belief`/`UNSET` events, appended after any explicit events
    /// (spec.md §6 validation note).
    pub fn into_batch(self, tenant: TenantId) -> EventBatch {
        let mut events = self.events;
        if let Some(csv) = self.unset_belief_ids {
            for slug in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                events.push(EventInput {
                    id: slug.to_string(),
                    event_type: "Belief".to_string(),
                    verb: "UNSET".to_string(),
                    object: String::new(),
                });
            }
        }

        EventBatch {
            tenant,
            session_id: self.session_id,
            events,
            current_pane: self.current_pane_id,
            goto_pane: self.goto_pane_id,
        }
    }
}

/// A belief-slug the unset button cascades to (spec.md §4.F.7); not a wire
/// type in its own right but kept here alongside the other small DTOs that
/// flow between the fragment generator and the HTTP layer.
pub type UnsetCascade = Vec<BeliefSlug>;
