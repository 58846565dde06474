//! Belief Registry Builder (spec.md §4.B): parses a storyfragment's pane
//! payloads into a `StoryfragmentBeliefRegistry` — the per-storyfragment
//! index of pane predicates and widget bindings everything downstream
//! reads from.
//!
//! The builder is a pure function of its inputs: building twice for the
//! same panes produces the same registry, so it is trivially safe to call
//! concurrently (the cache manager's write-through is what arbitrates "last
//! writer wins", not anything in here).

use super::evaluator::{LINKED_BELIEFS_SENTINEL, MATCH_ACROSS_SENTINEL};
use super::predicate::{BeliefClause, PaneBeliefPredicate};
use crate::dto::pane_tree::{self, PaneNode};
use crate::ids::{BeliefSlug, PaneId, StoryfragmentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Belief widget types the tree-walk scan recognizes (spec.md §4.B.2, §9
/// open question resolved: the tree-walk variant is the intended
/// behavior).
const WIDGET_TYPES: &[&str] = &["belief", "toggle", "identifyAs"];

/// Raw pane content as stored by the content layer — the builder's only
/// input shape. `options_payload` is the root `{"nodes": [...]}` tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneDefinition {
    pub pane_id: PaneId,
    #[serde(default)]
    pub held_beliefs: Value,
    #[serde(default)]
    pub withheld_beliefs: Value,
    #[serde(default)]
    pub options_payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryfragmentBeliefRegistry {
    pub storyfragment_id: StoryfragmentId,
    pub pane_predicates: HashMap<PaneId, PaneBeliefPredicate>,
    pub required_beliefs: HashSet<BeliefSlug>,
    /// Ordered by pane declaration, not by insertion into a hash table — the
    /// unset button's scroll target must be deterministic (spec.md §4.F.7).
    pub pane_widget_beliefs: Vec<(PaneId, Vec<BeliefSlug>)>,
    pub all_widget_beliefs: HashSet<BeliefSlug>,
    pub last_updated: DateTime<Utc>,
}

impl StoryfragmentBeliefRegistry {
    /// Every pane whose predicate references any of `changed_beliefs`
    /// (used by the broadcaster to decide whether this storyfragment needs
    /// re-evaluating at all; spec.md §4.H).
    pub fn intersects(&self, changed_beliefs: &HashSet<BeliefSlug>) -> bool {
        self.required_beliefs.intersection(changed_beliefs).next().is_some()
    }

    /// The first pane in widget-declaration order that controls any of the
    /// given belief slugs — the scroll target for an unset button
    /// (spec.md §4.F.7).
    pub fn first_pane_controlling(&self, slugs: &[BeliefSlug]) -> Option<&PaneId> {
        self.pane_widget_beliefs
            .iter()
            .find(|(_, widget_slugs)| widget_slugs.iter().any(|w| slugs.contains(w)))
            .map(|(pane_id, _)| pane_id)
    }
}

fn as_string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a pane's `held_beliefs` object, promoting the two sentinel keys
/// out into `match_across`/`linked` verbatim (spec.md §4.B.1, §3 invariant).
fn parse_held(value: &Value) -> (BeliefClause, Vec<BeliefSlug>, Vec<BeliefSlug>) {
    let mut clause = BeliefClause::new();
    let mut match_across = Vec::new();
    let mut linked = Vec::new();

    if let Some(obj) = value.as_object() {
        for (key, v) in obj {
            match key.as_str() {
                MATCH_ACROSS_SENTINEL => match_across = as_string_list(v),
                LINKED_BELIEFS_SENTINEL => linked = as_string_list(v),
                _ => clause.push((key.clone(), as_string_list(v))),
            }
        }
    }

    (clause, match_across, linked)
}

/// Parse `withheld_beliefs`; the sentinel keys never legitimately appear
/// here (spec.md §3 invariant), so they're dropped defensively rather than
/// promoted.
fn parse_withheld(value: &Value) -> BeliefClause {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(k, _)| k.as_str() != MATCH_ACROSS_SENTINEL && k.as_str() != LINKED_BELIEFS_SENTINEL)
                .map(|(k, v)| (k.clone(), as_string_list(v)))
                .collect()
        })
        .unwrap_or_default()
}

pub fn build_predicate(pane: &PaneDefinition) -> PaneBeliefPredicate {
    let (held, match_across, linked) = parse_held(&pane.held_beliefs);
    let withheld = parse_withheld(&pane.withheld_beliefs);

    PaneBeliefPredicate {
        held,
        withheld,
        match_across,
        linked,
        held_badges: BeliefClause::new(),
    }
}

fn walk_widgets(nodes: &[PaneNode], out: &mut Vec<BeliefSlug>) {
    for node in nodes {
        match node {
            PaneNode::Code {
                copy,
                code_hook_params,
            } => {
                if let Some(widget_type) = pane_tree::widget_type_of(copy) {
                    if WIDGET_TYPES.contains(&widget_type) {
                        if let Some(slug) = code_hook_params.first() {
                            out.push(slug.clone());
                        }
                    }
                }
            }
            PaneNode::Element { nodes, .. } => walk_widgets(nodes, out),
            PaneNode::Text(_) => {}
        }
    }
}

/// `pane_widget_beliefs[pane_id]` (spec.md §4.B.2): the ordered list of
/// belief slugs this pane's interactive widgets control, found by a
/// recursive walk of the parsed node tree.
pub fn scan_widgets(pane: &PaneDefinition) -> Vec<BeliefSlug> {
    let tree = pane_tree::parse_root(&pane.options_payload);
    let mut out = Vec::new();
    walk_widgets(&tree, &mut out);
    out
}

/// Build the full registry for one storyfragment from its ordered pane
/// list (spec.md §4.B).
pub fn build_registry(
    storyfragment_id: StoryfragmentId,
    panes: &[PaneDefinition],
) -> StoryfragmentBeliefRegistry {
    let mut pane_predicates = HashMap::new();
    let mut required_beliefs = HashSet::new();
    let mut pane_widget_beliefs = Vec::new();
    let mut all_widget_beliefs = HashSet::new();

    for pane in panes {
        let predicate = build_predicate(pane);
        if !predicate.is_empty() {
            required_beliefs.extend(predicate.referenced_slugs().cloned());
            pane_predicates.insert(pane.pane_id.clone(), predicate);
        }

        let widgets = scan_widgets(pane);
        if !widgets.is_empty() {
            all_widget_beliefs.extend(widgets.iter().cloned());
            pane_widget_beliefs.push((pane.pane_id.clone(), widgets));
        }
    }

    StoryfragmentBeliefRegistry {
        storyfragment_id,
        pane_predicates,
        required_beliefs,
        pane_widget_beliefs,
        all_widget_beliefs,
        last_updated: Utc::now(),
    }
}
