//! HTTP route handlers (spec.md §6): thin translation between wire DTOs and
//! the library's core operations. Routing details, tenant resolution from
//! the request, and auth wiring live in `main.rs`; these handlers only
//! orchestrate `fragment`, `events`, `session`, and `cache`.

use crate::api::AppState;
use crate::cache::TenantCache;
use crate::dto::{RenderPaneRequest, RenderPaneResponse, StateUpdateRequest, StateUpdateResponse};
use crate::error::CoreResult;
use crate::ids::TenantId;
use crate::session::{self, ResolveSessionInput};
use crate::sse;
use axum::extract::{Path, Query, State};
use axum::response::sse::Sse;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

fn tenant_for(state: &AppState, tenant_id: &TenantId) -> Arc<TenantCache> {
    state
        .cache
        .tenant(tenant_id)
        .unwrap_or_else(|| state.cache.initialize_tenant(tenant_id))
}

/// `GET /api/panes/:pane_id/render` (spec.md §6 "render a pane fragment").
#[tracing::instrument(skip(state), fields(tenant = %query.tenant))]
pub async fn render_pane(
    State(state): State<AppState>,
    Path(pane_id): Path<String>,
    Query(query): Query<RenderPaneRequest>,
) -> CoreResult<Json<RenderPaneResponse>> {
    metrics::increment_counter!("tractcore_render_pane_requests_total");
    let tenant = tenant_for(&state, &query.tenant);

    let session = session::resolve_session(
        &tenant,
        state.repository.as_ref(),
        ResolveSessionInput {
            session_id: Some(query.session_id),
            existing_fingerprint_id: None,
            lead_id: None,
            campaign_id: None,
        },
    )
    .await?;

    let html = crate::fragment::generate(&tenant, &pane_id, &session, &query.storyfragment_id).await?;
    Ok(Json(RenderPaneResponse { html }))
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant: TenantId,
}

/// `POST /api/state` (spec.md §6 "state update"). Tenant travels as a query
/// parameter the same way `render_pane` takes it — the wire body never
/// names a tenant (routing resolves it, spec.md §6).
#[tracing::instrument(skip(state, payload), fields(tenant = %tenant))]
pub async fn update_state(
    State(state): State<AppState>,
    Query(TenantQuery { tenant }): Query<TenantQuery>,
    Json(payload): Json<StateUpdateRequest>,
) -> CoreResult<Json<StateUpdateResponse>> {
    metrics::increment_counter!("tractcore_state_update_requests_total");
    let tenant_cache = tenant_for(&state, &tenant);
    let batch = payload.into_batch(tenant);

    let events = crate::events::process_events(
        &tenant_cache,
        state.repository.as_ref(),
        &state.sse_hub,
        batch,
    )
    .await?;

    Ok(Json(StateUpdateResponse {
        status: "ok".to_string(),
        events,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    pub tenant: TenantId,
    pub session_id: crate::ids::SessionId,
}

/// `GET /api/sse/:storyfragment_id` (spec.md §4.I, §6 "SSE event"). A fresh
/// connection on the same `(tenant, session, storyfragment)` key replaces
/// whatever subscription was already there.
pub async fn sse_stream(
    State(state): State<AppState>,
    Path(storyfragment_id): Path<String>,
    Query(query): Query<SseQuery>,
) -> impl IntoResponse {
    let tenant = tenant_for(&state, &query.tenant);
    let rx = state
        .sse_hub
        .subscribe(&tenant, query.session_id, storyfragment_id);

    Sse::new(sse::event_stream(rx)).keep_alive(axum::response::sse::KeepAlive::default())
}

/// `GET /api/sysop/sessions` (spec.md §4.C "cross-tenant", gated per
/// `AMBIENT-AUTH`).
pub async fn list_all_session_ids(State(state): State<AppState>) -> Json<Vec<(TenantId, String)>> {
    let ids = state
        .cache
        .get_all_session_ids()
        .into_iter()
        .map(|(tenant, session_id)| (tenant, session_id.to_string()))
        .collect();
    Json(ids)
}

/// `GET /api/sysop/fingerprints` (spec.md §4.C "cross-tenant", gated per
/// `AMBIENT-AUTH`).
pub async fn list_all_fingerprint_ids(
    State(state): State<AppState>,
) -> Json<Vec<(TenantId, String)>> {
    let ids = state
        .cache
        .get_all_fingerprint_ids()
        .into_iter()
        .map(|(tenant, fingerprint_id)| (tenant, fingerprint_id.to_string()))
        .collect();
    Json(ids)
}

pub async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{JwtHandler, UserStore};
    use crate::cache::CacheManager;
    use crate::config::Config;
    use crate::dto::EventInput;
    use crate::error::CoreError;
    use crate::repository::InMemoryRepository;
    use crate::sse::SseHub;

    fn app_state() -> AppState {
        AppState {
            cache: CacheManager::new(),
            repository: Arc::new(InMemoryRepository::new()),
            sse_hub: Arc::new(SseHub::new(4)),
            auth: crate::auth::AuthState::new(
                Arc::new(UserStore::new(":memory:").unwrap()),
                Arc::new(JwtHandler::new("test-secret".to_string())),
            ),
            config: Arc::new(Config::default()),
        }
    }

    #[tokio::test]
    async fn render_pane_surfaces_not_found_for_a_missing_pane() {
        let state = app_state();
        let tenant = state.cache.initialize_tenant("t1");
        let session = session::resolve_session(
            &tenant,
            state.repository.as_ref(),
            ResolveSessionInput {
                session_id: None,
                existing_fingerprint_id: None,
                lead_id: None,
                campaign_id: None,
            },
        )
        .await
        .unwrap();

        let result = render_pane(
            State(state),
            Path("missing".to_string()),
            Query(RenderPaneRequest {
                tenant: "t1".to_string(),
                session_id: session.session_id,
                storyfragment_id: "sf1".to_string(),
                pane_id: "missing".to_string(),
            }),
        )
        .await;

        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_state_rejects_an_empty_belief_id() {
        let state = app_state();
        let tenant = state.cache.initialize_tenant("t1");
        let session = session::resolve_session(
            &tenant,
            state.repository.as_ref(),
            ResolveSessionInput {
                session_id: None,
                existing_fingerprint_id: None,
                lead_id: None,
                campaign_id: None,
            },
        )
        .await
        .unwrap();

        let result = update_state(
            State(state),
            Query(TenantQuery { tenant: "t1".to_string() }),
            Json(StateUpdateRequest {
                session_id: session.session_id,
                events: vec![EventInput {
                    id: String::new(),
                    event_type: "Belief".to_string(),
                    verb: "SOMETHING".to_string(),
                    object: String::new(),
                }],
                unset_belief_ids: None,
                current_pane_id: None,
                goto_pane_id: None,
            }),
        )
        .await;

        assert!(result.is_err());
    }
}
