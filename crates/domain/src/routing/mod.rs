//! Routing rules and the pure routing engine.

mod engine;
mod pattern;
mod rule;

pub use engine::{Assignment, LineBinding, RoutingDecision, route};
pub use pattern::SkuPattern;
pub use rule::{LookupMethod, RoutingRule, RulePredicate};
