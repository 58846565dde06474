//! Pure belief evaluation (spec.md §4.A).
//!
//! Everything here is a free function over plain data: no cache, no I/O, no
//! clock. `evaluate` is the one function every other component ultimately
//! calls to decide whether a pane is shown.

use super::predicate::PaneBeliefPredicate;
use crate::dto::UnsetCascade;
use crate::ids::BeliefSlug;
use std::collections::HashMap;

pub const WILDCARD: &str = "*";

/// The belief values a visitor currently holds, keyed by slug. Values are
/// insertion-ordered per slug (spec.md §3, `FingerprintState.held_beliefs`);
/// evaluation only cares about membership, so a `HashMap` of `Vec<String>`
/// is sufficient here.
pub type UserBeliefs = HashMap<BeliefSlug, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        matches!(self, Visibility::Visible)
    }
}

/// `key_satisfied(required_values, key, user_beliefs)` — true iff the
/// visitor holds at least one value for `key` that's in `required_values`,
/// or `required_values` contains the wildcard `"*"` and the visitor holds
/// *any* value for `key` at all (spec.md §4.A.3).
fn key_satisfied(required_values: &[String], key: &str, user_beliefs: &UserBeliefs) -> bool {
    let Some(user_values) = user_beliefs.get(key) else {
        return false;
    };
    if user_values.is_empty() {
        return false;
    }

    required_values.iter().any(|req| {
        if req == WILDCARD {
            true
        } else {
            user_values.iter().any(|v| v == req)
        }
    })
}

/// The held-clause check (spec.md §4.A.1): `match_across` keys are OR'd
/// together as one group, every other held key is AND'd. An empty clause
/// (no keys of that kind) passes trivially so it never blocks the other
/// group.
fn held_passes(predicate: &PaneBeliefPredicate, user_beliefs: &UserBeliefs) -> bool {
    let (match_across_keys, regular_keys): (Vec<_>, Vec<_>) = predicate
        .held
        .iter()
        .partition(|(k, _)| predicate.is_match_across(k));

    let match_across_ok = match_across_keys.is_empty()
        || match_across_keys
            .iter()
            .any(|(k, values)| key_satisfied(values, k, user_beliefs));

    let regular_ok = regular_keys
        .iter()
        .all(|(k, values)| key_satisfied(values, k, user_beliefs));

    match_across_ok && regular_ok
}

/// The withheld-clause check (spec.md §4.A.2): any forbidden value the
/// visitor holds fails the predicate outright.
fn withheld_passes(predicate: &PaneBeliefPredicate, user_beliefs: &UserBeliefs) -> bool {
    !predicate
        .withheld
        .iter()
        .any(|(k, values)| key_satisfied(values, k, user_beliefs))
}

/// `evaluate(predicate, user_beliefs) -> {visible, hidden}` (spec.md §4.A).
///
/// Deterministic and side-effect free: invariant 1 in spec.md §8.
pub fn evaluate(predicate: &PaneBeliefPredicate, user_beliefs: &UserBeliefs) -> Visibility {
    if held_passes(predicate, user_beliefs) && withheld_passes(predicate, user_beliefs) {
        Visibility::Visible
    } else {
        Visibility::Hidden
    }
}

/// The sentinel keys promoted out of a pane's raw `held_beliefs` object
/// during registry parsing (spec.md §3 invariant, §4.B.1).
pub const MATCH_ACROSS_SENTINEL: &str = "MATCH-ACROSS";
pub const LINKED_BELIEFS_SENTINEL: &str = "LINKED-BELIEFS";

/// An ordered belief-slug -> values map, used for the unset-button UI. May
/// carry the two sentinel entries alongside real belief slugs.
pub type EffectiveFilter = Vec<(String, Vec<String>)>;

/// `effective_filter(predicate, user_beliefs)` (spec.md §4.A auxiliary) —
/// the intersection of the visitor's held beliefs with the slugs this
/// predicate references, plus the sentinel `MATCH-ACROSS` / `LINKED-BELIEFS`
/// entries when the predicate uses those features.
pub fn effective_filter(predicate: &PaneBeliefPredicate, user_beliefs: &UserBeliefs) -> EffectiveFilter {
    let mut filter = EffectiveFilter::new();
    let mut seen = std::collections::HashSet::new();

    for (slug, _) in predicate.held.iter().chain(predicate.withheld.iter()) {
        if !seen.insert(slug.clone()) {
            continue;
        }
        if let Some(values) = user_beliefs.get(slug) {
            filter.push((slug.clone(), values.clone()));
        }
    }

    if !predicate.match_across.is_empty() {
        filter.push((MATCH_ACROSS_SENTINEL.to_string(), predicate.match_across.clone()));
    }
    if !predicate.linked.is_empty() {
        filter.push((LINKED_BELIEFS_SENTINEL.to_string(), predicate.linked.clone()));
    }

    filter
}

/// `beliefs_to_unset(effective_filter)` (spec.md §4.A auxiliary) — every
/// non-sentinel key in the filter, plus the full linked-belief cascade even
/// for members the visitor doesn't currently hold (spec.md S6).
pub fn beliefs_to_unset(filter: &EffectiveFilter) -> UnsetCascade {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (key, _) in filter {
        if key == MATCH_ACROSS_SENTINEL || key == LINKED_BELIEFS_SENTINEL {
            continue;
        }
        if seen.insert(key.clone()) {
            out.push(key.clone());
        }
    }

    if let Some((_, linked)) = filter.iter().find(|(k, _)| k == LINKED_BELIEFS_SENTINEL) {
        for slug in linked {
            if seen.insert(slug.clone()) {
                out.push(slug.clone());
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beliefs(pairs: &[(&str, &[&str])]) -> UserBeliefs {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn held(pairs: &[(&str, &[&str])]) -> super::super::predicate::BeliefClause {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn empty_predicate_is_always_visible() {
        let p = PaneBeliefPredicate::default();
        assert_eq!(evaluate(&p, &beliefs(&[])), Visibility::Visible);
        assert_eq!(
            evaluate(&p, &beliefs(&[("color", &["red"])])),
            Visibility::Visible
        );
    }

    // S1: held AND.
    #[test]
    fn held_and_requires_every_key() {
        let mut p = PaneBeliefPredicate::default();
        p.held = held(&[("color", &["red"]), ("size", &["L"])]);

        assert_eq!(
            evaluate(&p, &beliefs(&[("color", &["red"])])),
            Visibility::Hidden
        );
        assert_eq!(
            evaluate(&p, &beliefs(&[("color", &["red"]), ("size", &["L"])])),
            Visibility::Visible
        );
    }

    // S2: match-across OR.
    #[test]
    fn match_across_is_or_within_its_group() {
        let mut p = PaneBeliefPredicate::default();
        p.held = held(&[("a", &["1"]), ("b", &["2"])]);
        p.match_across = vec!["a".to_string(), "b".to_string()];

        assert_eq!(
            evaluate(&p, &beliefs(&[("a", &["1"])])),
            Visibility::Visible
        );
        assert_eq!(evaluate(&p, &beliefs(&[])), Visibility::Hidden);
    }

    // S3: withheld dominates.
    #[test]
    fn withheld_value_hides_regardless_of_held_outcome() {
        let mut p = PaneBeliefPredicate::default();
        p.withheld = held(&[("role", &["banned"])]);

        assert_eq!(
            evaluate(&p, &beliefs(&[("role", &["user", "banned"])])),
            Visibility::Hidden
        );
        assert_eq!(
            evaluate(&p, &beliefs(&[("role", &["user"])])),
            Visibility::Visible
        );
    }

    #[test]
    fn wildcard_matches_any_held_value_but_requires_the_key() {
        let mut p = PaneBeliefPredicate::default();
        p.held = held(&[("lang", &["*"])]);

        assert_eq!(
            evaluate(&p, &beliefs(&[("lang", &["en"])])),
            Visibility::Visible
        );
        assert_eq!(evaluate(&p, &beliefs(&[])), Visibility::Hidden);
    }

    #[test]
    fn mixed_match_across_and_regular_keys_and_both_groups() {
        // a/b are match-across (OR), c is regular (AND) -- both groups
        // must pass.
        let mut p = PaneBeliefPredicate::default();
        p.held = held(&[("a", &["1"]), ("b", &["2"]), ("c", &["3"])]);
        p.match_across = vec!["a".to_string(), "b".to_string()];

        // match-across satisfied, regular not -> hidden.
        assert_eq!(
            evaluate(&p, &beliefs(&[("a", &["1"])])),
            Visibility::Hidden
        );
        // both satisfied -> visible.
        assert_eq!(
            evaluate(&p, &beliefs(&[("a", &["1"]), ("c", &["3"])])),
            Visibility::Visible
        );
    }

    // S6: unset cascade.
    #[test]
    fn beliefs_to_unset_includes_linked_cascade_even_when_not_held() {
        let mut p = PaneBeliefPredicate::default();
        p.held = held(&[("a", &["1"])]);
        p.linked = vec!["b".to_string(), "c".to_string()];

        let user = beliefs(&[("a", &["1"]), ("b", &["x"])]);
        let filter = effective_filter(&p, &user);
        let unset = beliefs_to_unset(&filter);

        assert_eq!(unset, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn effective_filter_only_carries_sentinels_when_predicate_uses_them() {
        let p = PaneBeliefPredicate::default();
        let filter = effective_filter(&p, &beliefs(&[("a", &["1"])]));
        assert!(filter.is_empty());
    }
}
