//! Belief Registry + Visibility Evaluator (spec.md §4.A, §4.B).

pub mod evaluator;
pub mod predicate;
pub mod registry;

pub use evaluator::{effective_filter, beliefs_to_unset, evaluate, EffectiveFilter, UserBeliefs, Visibility};
pub use predicate::{BeliefClause, PaneBeliefPredicate};
pub use registry::{build_registry, scan_widgets, PaneDefinition, StoryfragmentBeliefRegistry};
