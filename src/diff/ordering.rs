//! Foreign key dependency ordering
//!
//! Kahn's algorithm over the table dependency graph. Unlike a plain
//! topological sort this never fails: when every remaining table still waits
//! on another one, the smallest table that lies on a cycle gives up the edges
//! that close it, and those edges are reported as deferred. Tables that only
//! point into a cycle keep their edges. Callers turn deferred edges into
//! foreign keys added (or dropped) separately.

use std::collections::{BTreeMap, BTreeSet};

/// Result of ordering a set of tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologicalOrder {
    /// Table names, dependencies first.
    pub order: Vec<String>,
    /// `(table, referenced_table)` edges that had to be broken.
    pub deferred: Vec<(String, String)>,
}

impl TopologicalOrder {
    pub fn is_deferred(&self, table: &str, referenced: &str) -> bool {
        self.deferred
            .iter()
            .any(|(t, r)| t == table && r == referenced)
    }
}

/// Order `tables` so that each comes after the tables it depends on.
///
/// `tables` maps a table name to the names it references. Self references
/// and references to tables outside the map are ignored. Ties are broken by
/// name so the output is deterministic.
pub fn topological_order(tables: &BTreeMap<String, BTreeSet<String>>) -> TopologicalOrder {
    let mut pending: BTreeMap<&str, BTreeSet<&str>> = tables
        .iter()
        .map(|(name, deps)| {
            let deps = deps
                .iter()
                .map(String::as_str)
                .filter(|d| *d != name.as_str() && tables.contains_key(*d))
                .collect();
            (name.as_str(), deps)
        })
        .collect();

    let mut result = TopologicalOrder::default();
    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(name, _)| *name)
        .collect();
    for name in &ready {
        pending.remove(name);
    }

    loop {
        let Some(current) = ready.pop_first() else {
            let Some((stuck, closing)) = cycle_break(&pending) else {
                break;
            };
            let Some(deps) = pending.get_mut(stuck) else {
                break;
            };
            for dep in closing {
                deps.remove(dep);
                result.deferred.push((stuck.to_string(), dep.to_string()));
            }
            if deps.is_empty() {
                pending.remove(stuck);
                ready.insert(stuck);
            }
            continue;
        };
        result.order.push(current.to_string());

        let mut unblocked = Vec::new();
        for (name, deps) in pending.iter_mut() {
            if deps.remove(current) && deps.is_empty() {
                unblocked.push(*name);
            }
        }
        for name in unblocked {
            pending.remove(name);
            ready.insert(name);
        }
    }

    result
}

/// The smallest waiting table on a cycle, with its edges that close one.
fn cycle_break<'a>(
    pending: &BTreeMap<&'a str, BTreeSet<&'a str>>,
) -> Option<(&'a str, Vec<&'a str>)> {
    pending.iter().find_map(|(&name, deps)| {
        let closing: Vec<&str> = deps
            .iter()
            .copied()
            .filter(|dep| reaches(pending, dep, name))
            .collect();
        (!closing.is_empty()).then_some((name, closing))
    })
}

fn reaches(pending: &BTreeMap<&str, BTreeSet<&str>>, from: &str, to: &str) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(deps) = pending.get(node) {
            stack.extend(deps.iter().copied());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        edges
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_topological_order_simple() {
        let order = topological_order(&graph(&[
            ("bank_transactions", &["bank_accounts"]),
            ("bank_accounts", &["banks"]),
            ("banks", &[]),
        ]));
        assert_eq!(order.order, ["banks", "bank_accounts", "bank_transactions"]);
        assert!(order.deferred.is_empty());
    }

    #[test]
    fn test_self_reference_ignored() {
        let order = topological_order(&graph(&[("nodes", &["nodes"])]));
        assert_eq!(order.order, ["nodes"]);
        assert!(order.deferred.is_empty());
    }

    #[test]
    fn test_external_reference_ignored() {
        let order = topological_order(&graph(&[("posts", &["users"])]));
        assert_eq!(order.order, ["posts"]);
    }

    #[test]
    fn test_table_pointing_into_cycle_keeps_its_edge() {
        let order = topological_order(&graph(&[
            ("a", &["c"]),
            ("c", &["d"]),
            ("d", &["c"]),
        ]));
        assert_eq!(order.order, ["c", "a", "d"]);
        assert_eq!(order.deferred, [("c".to_string(), "d".to_string())]);
        assert!(!order.is_deferred("a", "c"));
    }

    #[test]
    fn test_cycle_edge_kept_when_other_dep_waits() {
        let order = topological_order(&graph(&[
            ("a", &["b", "z"]),
            ("b", &["a"]),
            ("z", &["y"]),
            ("y", &["z"]),
        ]));
        assert_eq!(order.deferred.len(), 2);
        assert!(order.is_deferred("a", "b"));
        assert!(order.is_deferred("y", "z"));
        assert!(!order.is_deferred("a", "z"));
        assert_eq!(order.order, ["y", "z", "a", "b"]);
    }

    #[test]
    fn test_cycle_is_broken_at_smallest_name() {
        let order = topological_order(&graph(&[
            ("a", &["b"]),
            ("b", &["a"]),
            ("c", &["a"]),
        ]));
        assert_eq!(order.order, ["a", "b", "c"]);
        assert_eq!(order.deferred, [("a".to_string(), "b".to_string())]);
        assert!(order.is_deferred("a", "b"));
        assert!(!order.is_deferred("b", "a"));
    }

    #[test]
    fn test_independent_tables_sorted_by_name() {
        let order = topological_order(&graph(&[("zeta", &[]), ("alpha", &[])]));
        assert_eq!(order.order, ["alpha", "zeta"]);
    }
}
