//! The routing engine: a pure function from lines and rules to destinations.

use common::{LineId, RuleId, StoreId};

use super::{LookupMethod, RoutingRule};
use crate::order::OrderLine;

/// Outcome for a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// The line goes to `destination`.
    ///
    /// `rule_id` is `None` when the line was already bound before this
    /// decision; existing bindings are never re-evaluated.
    Routed {
        destination: StoreId,
        rule_id: Option<RuleId>,
        lookup: LookupMethod,
    },
    /// No rule matched.
    Unrouted,
}

impl Assignment {
    pub fn destination(&self) -> Option<StoreId> {
        match self {
            Assignment::Routed { destination, .. } => Some(*destination),
            Assignment::Unrouted => None,
        }
    }
}

/// A decided line-to-destination binding, ready to be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineBinding {
    pub line_id: LineId,
    pub destination: StoreId,
    pub lookup: LookupMethod,
}

/// Per-line routing result, in line order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingDecision {
    assignments: Vec<(LineId, Assignment)>,
}

impl RoutingDecision {
    pub fn assignments(&self) -> &[(LineId, Assignment)] {
        &self.assignments
    }

    pub fn get(&self, line_id: LineId) -> Option<&Assignment> {
        self.assignments
            .iter()
            .find(|(id, _)| *id == line_id)
            .map(|(_, a)| a)
    }

    /// Distinct destinations in first-seen line order.
    pub fn destinations(&self) -> Vec<StoreId> {
        let mut out = Vec::new();
        for dest in self.assignments.iter().filter_map(|(_, a)| a.destination()) {
            if !out.contains(&dest) {
                out.push(dest);
            }
        }
        out
    }

    /// Lines routed to `destination`.
    pub fn lines_for(&self, destination: StoreId) -> Vec<LineId> {
        self.assignments
            .iter()
            .filter(|(_, a)| a.destination() == Some(destination))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Lookup method of the first line sent to `destination`.
    pub fn lookup_for(&self, destination: StoreId) -> LookupMethod {
        self.assignments
            .iter()
            .find_map(|(_, a)| match a {
                Assignment::Routed {
                    destination: d,
                    lookup,
                    ..
                } if *d == destination => Some(*lookup),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Lines no rule matched.
    pub fn unrouted(&self) -> Vec<LineId> {
        self.assignments
            .iter()
            .filter(|(_, a)| matches!(a, Assignment::Unrouted))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Newly decided bindings (excludes lines that were already bound).
    pub fn new_bindings(&self) -> Vec<LineBinding> {
        self.assignments
            .iter()
            .filter_map(|(id, a)| match a {
                Assignment::Routed {
                    destination,
                    rule_id: Some(_),
                    lookup,
                } => Some(LineBinding {
                    line_id: *id,
                    destination: *destination,
                    lookup: *lookup,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn routed_count(&self) -> usize {
        self.assignments
            .iter()
            .filter(|(_, a)| a.destination().is_some())
            .count()
    }

    /// True when not a single line found a destination.
    pub fn is_empty_route(&self) -> bool {
        self.routed_count() == 0
    }
}

/// Routes each line to a destination.
///
/// Rules are evaluated by descending priority; equal priorities keep the
/// order in which they appear in `rules`. The first matching rule wins.
/// Lines that already have a destination keep it.
pub fn route(lines: &[OrderLine], rules: &[RoutingRule]) -> RoutingDecision {
    let mut ordered: Vec<&RoutingRule> = rules.iter().filter(|r| r.active).collect();
    // `sort_by` is stable, so insertion order breaks ties.
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

    let assignments = lines
        .iter()
        .map(|line| {
            if let Some(destination) = line.destination {
                return (
                    line.id,
                    Assignment::Routed {
                        destination,
                        rule_id: None,
                        lookup: line.lookup,
                    },
                );
            }
            let assignment = ordered
                .iter()
                .find(|rule| rule.predicate.matches(line))
                .map(|rule| Assignment::Routed {
                    destination: rule.destination_store_id,
                    rule_id: Some(rule.id),
                    lookup: rule.lookup,
                })
                .unwrap_or(Assignment::Unrouted);
            (line.id, assignment)
        })
        .collect();

    RoutingDecision { assignments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::RawOrderLine;
    use crate::routing::RulePredicate;
    use common::OrderId;

    fn lines(skus: &[&str]) -> Vec<OrderLine> {
        let order_id = OrderId::new();
        skus.iter()
            .enumerate()
            .map(|(i, sku)| OrderLine::from_raw(order_id, i as i32, &RawOrderLine::new(*sku, 1)))
            .collect()
    }

    fn rule(dest: StoreId, pattern: &str, priority: i32) -> RoutingRule {
        RoutingRule::new(StoreId::new(), dest, RulePredicate::sku(pattern), priority)
    }

    #[test]
    fn routes_each_line_by_pattern() {
        let x = StoreId::new();
        let y = StoreId::new();
        let rules = vec![rule(x, "PROD-A%", 10), rule(y, "PROD-B%", 5)];
        let lines = lines(&["PROD-A1", "PROD-B2"]);

        let decision = route(&lines, &rules);

        assert_eq!(decision.get(lines[0].id).unwrap().destination(), Some(x));
        assert_eq!(decision.get(lines[1].id).unwrap().destination(), Some(y));
        assert_eq!(decision.destinations(), vec![x, y]);
        assert!(decision.unrouted().is_empty());
    }

    #[test]
    fn higher_priority_wins_regardless_of_position() {
        let low = StoreId::new();
        let high = StoreId::new();
        let rules = vec![rule(low, "PROD-%", 1), rule(high, "PROD-A%", 9)];
        let lines = lines(&["PROD-A1"]);

        let decision = route(&lines, &rules);
        assert_eq!(decision.destinations(), vec![high]);
    }

    #[test]
    fn equal_priority_uses_insertion_order() {
        let first = StoreId::new();
        let second = StoreId::new();
        let rules = vec![rule(first, "%", 3), rule(second, "PROD-%", 3)];
        let lines = lines(&["PROD-A1"]);

        for _ in 0..10 {
            assert_eq!(route(&lines, &rules).destinations(), vec![first]);
        }
    }

    #[test]
    fn unmatched_lines_are_reported() {
        let x = StoreId::new();
        let rules = vec![rule(x, "PROD-A%", 1)];
        let lines = lines(&["PROD-A1", "OTHER-9"]);

        let decision = route(&lines, &rules);
        assert_eq!(decision.unrouted(), vec![lines[1].id]);
        assert_eq!(decision.routed_count(), 1);
        assert!(!decision.is_empty_route());
    }

    #[test]
    fn no_rules_means_empty_route() {
        let decision = route(&lines(&["A", "B"]), &[]);
        assert!(decision.is_empty_route());
        assert_eq!(decision.unrouted().len(), 2);
    }

    #[test]
    fn inactive_rules_are_skipped() {
        let x = StoreId::new();
        let y = StoreId::new();
        let rules = vec![rule(x, "%", 10).inactive(), rule(y, "%", 1)];
        assert_eq!(route(&lines(&["A"]), &rules).destinations(), vec![y]);
    }

    #[test]
    fn existing_bindings_are_kept() {
        let old = StoreId::new();
        let new = StoreId::new();
        let mut lines = lines(&["PROD-A1", "PROD-A2"]);
        lines[0].assign(old, LookupMethod::Ean).unwrap();

        let decision = route(&lines, &[rule(new, "PROD-A%", 100)]);

        assert_eq!(decision.get(lines[0].id).unwrap().destination(), Some(old));
        assert_eq!(decision.lookup_for(old), LookupMethod::Ean);
        assert_eq!(
            decision.new_bindings(),
            vec![LineBinding {
                line_id: lines[1].id,
                destination: new,
                lookup: LookupMethod::Sku,
            }]
        );
    }

    #[test]
    fn lookup_method_follows_matching_rule() {
        let x = StoreId::new();
        let rules = vec![rule(x, "%", 1).with_lookup(LookupMethod::Ean)];
        let decision = route(&lines(&["A"]), &rules);
        assert_eq!(decision.lookup_for(x), LookupMethod::Ean);
    }
}
