//! Fragment Generator (spec.md §4.F): orchestrates the belief registry
//! builder, the per-tenant cache, and the HTML chunk cache to produce
//! either a shared base-HTML render or a personalized one, then applies the
//! visibility wrapper and, where applicable, the unset-button injection.

use crate::belief::{self, evaluator, registry::PaneDefinition, StoryfragmentBeliefRegistry, UserBeliefs, Visibility};
use crate::cache::{ContentKind, TenantCache, Variant};
use crate::dto::pane_tree::{self, PaneNode};
use crate::error::{CoreError, CoreResult};
use crate::ids::PaneId;
use crate::session::SessionData;
use serde_json::Value;
use std::sync::Arc;

fn pane_definition(tenant: &TenantCache, pane_id: &str) -> CoreResult<PaneDefinition> {
    let value = tenant
        .content
        .get(ContentKind::Pane, pane_id)
        .ok_or_else(|| CoreError::not_found(format!("pane {pane_id}")))?;
    Ok(PaneDefinition {
        pane_id: pane_id.to_string(),
        held_beliefs: value.get("heldBeliefs").cloned().unwrap_or(Value::Null),
        withheld_beliefs: value.get("withheldBeliefs").cloned().unwrap_or(Value::Null),
        options_payload: value.get("optionsPayload").cloned().unwrap_or(Value::Null),
    })
}

pub(crate) fn storyfragment_pane_ids(value: &Value) -> Vec<PaneId> {
    value
        .get("paneIds")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Fetch the storyfragment's belief registry, building it on miss (spec.md
/// §4.F.2). Concurrent misses for the same storyfragment serialize on the
/// cache's rebuild lock; a winner that races ahead populates the cache
/// before a loser even starts its own rebuild.
async fn registry_for(tenant: &Arc<TenantCache>, storyfragment_id: &str) -> CoreResult<StoryfragmentBeliefRegistry> {
    if let Some(registry) = tenant.get_registry(storyfragment_id) {
        return Ok(registry);
    }

    let sf_value = tenant
        .content
        .get(ContentKind::Storyfragment, storyfragment_id)
        .ok_or_else(|| CoreError::not_found(format!("storyfragment {storyfragment_id}")))?;
    let pane_ids = storyfragment_pane_ids(&sf_value);
    let storyfragment_id = storyfragment_id.to_string();
    let key = format!("registry:{storyfragment_id}");

    let registry = tenant
        .rebuilds
        .run_or_cached(
            &key,
            || tenant.get_registry(&storyfragment_id),
            || async {
                let mut panes = Vec::with_capacity(pane_ids.len());
                for id in &pane_ids {
                    match pane_definition(tenant, id) {
                        Ok(def) => panes.push(def),
                        Err(err) => {
                            tracing::warn!(pane_id = %id, error = %err, "skipping pane while building registry");
                        }
                    }
                }
                let registry = belief::build_registry(storyfragment_id.clone(), &panes);
                tenant.set_registry(registry.clone());
                registry
            },
        )
        .await;

    Ok(registry)
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(input: &str) -> String {
    escape_html(input).replace('"', "&quot;")
}

fn render_nodes(nodes: &[PaneNode], widget_values: Option<&UserBeliefs>) -> String {
    nodes.iter().map(|n| render_node(n, widget_values)).collect()
}

fn render_node(node: &PaneNode, widget_values: Option<&UserBeliefs>) -> String {
    match node {
        PaneNode::Text(text) => escape_html(text),
        PaneNode::Element { tag, nodes } => {
            format!("<{tag}>{}</{tag}>", render_nodes(nodes, widget_values))
        }
        PaneNode::Code { copy, code_hook_params } => {
            let current_value = code_hook_params
                .first()
                .and_then(|slug| widget_values.and_then(|b| b.get(slug)))
                .and_then(|values| values.last());
            match current_value {
                Some(value) => format!(
                    "<div data-widget=\"{}\" data-current-value=\"{}\"></div>",
                    escape_attr(copy),
                    escape_attr(value)
                ),
                None => format!("<div data-widget=\"{}\"></div>", escape_attr(copy)),
            }
        }
    }
}

fn render_pane_html(pane: &PaneDefinition, widget_values: Option<&UserBeliefs>) -> String {
    let tree = pane_tree::parse_root(&pane.options_payload);
    render_nodes(&tree, widget_values)
}

fn wrap_hidden(html: String) -> String {
    format!("<div style=\"display:none !important\">{html}</div>")
}

fn inject_unset_button(html: String, unset_ids: &[String], scroll_target: Option<&str>) -> String {
    let ids = unset_ids.join(",");
    let target_attr = scroll_target
        .map(|t| format!(" data-scroll-target=\"{}\"", escape_attr(t)))
        .unwrap_or_default();
    format!(
        "{html}<button type=\"button\" data-action=\"unset-beliefs\" data-belief-ids=\"{}\"{}>Reset</button>",
        escape_attr(&ids),
        target_attr
    )
}

/// `generate(pane_id, session_id, storyfragment_id) -> html` (spec.md §4.F).
pub async fn generate(
    tenant: &Arc<TenantCache>,
    pane_id: &str,
    session: &SessionData,
    storyfragment_id: &str,
) -> CoreResult<String> {
    let pane = pane_definition(tenant, pane_id)?;
    let registry = registry_for(tenant, storyfragment_id).await?;

    let fingerprint = tenant.get_fingerprint(&session.fingerprint_id);
    let user_beliefs: UserBeliefs = fingerprint.map(|fp| fp.as_user_beliefs()).unwrap_or_default();
    let has_beliefs = !user_beliefs.is_empty();
    let has_pane_beliefs = registry.pane_predicates.contains_key(pane_id);

    let mut body = if has_beliefs && has_pane_beliefs {
        render_pane_html(&pane, Some(&user_beliefs))
    } else {
        let variant = Variant::default_variant();
        if let Some(cached) = tenant.html_chunks.get(pane_id, &variant) {
            cached.html
        } else {
            let html = render_pane_html(&pane, None);
            tenant
                .html_chunks
                .set(pane_id, variant, html.clone(), vec![pane_id.to_string()]);
            html
        }
    };

    if has_pane_beliefs {
        let predicate = registry
            .pane_predicates
            .get(pane_id)
            .expect("has_pane_beliefs just confirmed presence");
        let visibility = evaluator::evaluate(predicate, &user_beliefs);

        match visibility {
            Visibility::Hidden => {
                body = wrap_hidden(body);
            }
            Visibility::Visible => {
                let holds_any = predicate.referenced_slugs().any(|slug| user_beliefs.contains_key(slug));
                if holds_any {
                    let filter = evaluator::effective_filter(predicate, &user_beliefs);
                    let unset_ids = evaluator::beliefs_to_unset(&filter);
                    if !unset_ids.is_empty() {
                        let scroll_target = registry.first_pane_controlling(&unset_ids);
                        body = inject_unset_button(body, &unset_ids, scroll_target.map(String::as_str));
                    }
                }
            }
        }
    }

    Ok(body)
}

/// `generate_batch(...)`: pre-resolves widget context once and iterates;
/// a failure on one pane is reported without aborting the batch (spec.md
/// §4.F, §7 propagation policy).
pub async fn generate_batch(
    tenant: &Arc<TenantCache>,
    pane_ids: &[String],
    session: &SessionData,
    storyfragment_id: &str,
) -> Vec<(PaneId, CoreResult<String>)> {
    let mut out = Vec::with_capacity(pane_ids.len());
    for pane_id in pane_ids {
        let result = generate(tenant, pane_id, session, storyfragment_id).await;
        if let Err(err) = &result {
            tracing::warn!(pane_id = %pane_id, error = %err, "fragment generation failed for pane in batch");
        }
        out.push((pane_id.clone(), result));
    }
    out
}

/// `generate_from_payload(pane_id, options_payload)`: a preview path that
/// bypasses the registry, the user chain, and the cache entirely (spec.md
/// §4.F).
pub fn generate_from_payload(pane_id: &str, options_payload: &Value) -> String {
    let pane = PaneDefinition {
        pane_id: pane_id.to_string(),
        held_beliefs: Value::Null,
        withheld_beliefs: Value::Null,
        options_payload: options_payload.clone(),
    };
    render_pane_html(&pane, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{FingerprintId, SessionId, VisitId};
    use crate::session::FingerprintState;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn seed_pane(tenant: &TenantCache, id: &str, held: Value, payload: Value) {
        tenant.content.set(
            ContentKind::Pane,
            id,
            json!({"heldBeliefs": held, "withheldBeliefs": {}, "optionsPayload": payload}),
        );
    }

    fn seed_storyfragment(tenant: &TenantCache, id: &str, pane_ids: &[&str]) {
        tenant.content.set(
            ContentKind::Storyfragment,
            id,
            json!({"paneIds": pane_ids}),
        );
    }

    fn session_for(fingerprint_id: FingerprintId) -> SessionData {
        let now = Utc::now();
        SessionData {
            session_id: SessionId::new(),
            fingerprint_id,
            visit_id: VisitId::new(),
            lead_id: None,
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn visible_pane_renders_without_a_wrapper() {
        let tenant = Arc::new(TenantCache::new());
        seed_pane(&tenant, "p1", json!({}), json!({"nodes": ["hello"]}));
        seed_storyfragment(&tenant, "sf1", &["p1"]);

        let session = session_for(FingerprintId::new());
        let html = generate(&tenant, "p1", &session, "sf1").await.unwrap();
        assert_eq!(html, "hello");
    }

    #[tokio::test]
    async fn hidden_pane_is_wrapped_in_a_display_none_container() {
        let tenant = Arc::new(TenantCache::new());
        seed_pane(&tenant, "p1", json!({"tier": ["pro"]}), json!({"nodes": ["secret"]}));
        seed_storyfragment(&tenant, "sf1", &["p1"]);

        let fingerprint_id = FingerprintId::new();
        let mut fp = FingerprintState::new(fingerprint_id.clone());
        fp.append_value("tier", "free");
        tenant.set_fingerprint(fp);

        let session = session_for(fingerprint_id);
        let html = generate(&tenant, "p1", &session, "sf1").await.unwrap();
        assert!(html.contains("display:none"));
        assert!(html.contains("secret"));
    }

    #[tokio::test]
    async fn unset_button_is_injected_when_the_visitor_holds_a_referenced_belief() {
        let tenant = Arc::new(TenantCache::new());
        seed_pane(&tenant, "p1", json!({"tier": ["pro"]}), json!({"nodes": ["welcome"]}));
        seed_storyfragment(&tenant, "sf1", &["p1"]);

        let fingerprint_id = FingerprintId::new();
        let mut fp = FingerprintState::new(fingerprint_id.clone());
        fp.append_value("tier", "pro");
        tenant.set_fingerprint(fp);

        let session = session_for(fingerprint_id);
        let html = generate(&tenant, "p1", &session, "sf1").await.unwrap();
        assert!(html.contains("data-action=\"unset-beliefs\""));
        assert!(html.contains("tier"));
    }

    #[tokio::test]
    async fn batch_reports_per_pane_errors_without_aborting() {
        let tenant = Arc::new(TenantCache::new());
        seed_pane(&tenant, "p1", json!({}), json!({"nodes": ["ok"]}));
        seed_storyfragment(&tenant, "sf1", &["p1", "missing"]);

        let session = session_for(FingerprintId::new());
        let results = generate_batch(
            &tenant,
            &["p1".to_string(), "missing".to_string()],
            &session,
            "sf1",
        )
        .await;

        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }

    #[test]
    fn preview_path_bypasses_cache_and_registry_entirely() {
        let html = generate_from_payload("preview", &json!({"nodes": ["draft"]}));
        assert_eq!(html, "draft");
    }
}
