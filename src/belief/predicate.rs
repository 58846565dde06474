//! The compiled visibility rule for a single pane (spec.md §3, `PaneBeliefPredicate`).

use crate::ids::BeliefSlug;
use serde::{Deserialize, Serialize};

/// Held/withheld clauses keep insertion order rather than a `HashMap` so
/// that derived views (`effective_filter`, `beliefs_to_unset`) are
/// deterministic — the registry builder populates them in the order the
/// pane's JSON payload declares its belief keys.
pub type BeliefClause = Vec<(BeliefSlug, Vec<String>)>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaneBeliefPredicate {
    pub held: BeliefClause,
    pub withheld: BeliefClause,
    pub match_across: Vec<BeliefSlug>,
    pub linked: Vec<BeliefSlug>,
    /// Reserved for future use; the registry builder never populates this
    /// and nothing else reads it (spec.md §9 open question).
    #[serde(default)]
    pub held_badges: BeliefClause,
}

impl PaneBeliefPredicate {
    pub fn is_empty(&self) -> bool {
        self.held.is_empty() && self.withheld.is_empty()
    }

    pub fn held_values(&self, slug: &str) -> Option<&[String]> {
        self.held
            .iter()
            .find(|(k, _)| k == slug)
            .map(|(_, v)| v.as_slice())
    }

    pub fn withheld_values(&self, slug: &str) -> Option<&[String]> {
        self.withheld
            .iter()
            .find(|(k, _)| k == slug)
            .map(|(_, v)| v.as_slice())
    }

    pub fn is_match_across(&self, slug: &str) -> bool {
        self.match_across.iter().any(|k| k == slug)
    }

    /// Every belief-slug referenced anywhere in this predicate.
    pub fn referenced_slugs(&self) -> impl Iterator<Item = &BeliefSlug> {
        self.held
            .iter()
            .map(|(k, _)| k)
            .chain(self.withheld.iter().map(|(k, _)| k))
            .chain(self.match_across.iter())
            .chain(self.linked.iter())
    }
}
