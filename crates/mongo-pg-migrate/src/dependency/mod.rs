//! Table insertion ordering from foreign-key relationships.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use tracing::{debug, warn};

use crate::core::TableRelationship;

/// Order `tables` so every referenced table precedes the tables referencing it.
///
/// The result is a permutation of the input with duplicates removed (first
/// occurrence wins). Only relationships whose both endpoints are in `tables`
/// constrain the order. Among tables that are ready at the same time the one
/// appearing first in the input goes first.
///
/// Self references are dropped before sorting. A plain Kahn filter would count
/// such an edge toward the table's own in-degree and leave it unresolved as a
/// one-table cycle; here a self-referencing table orders like any other.
///
/// Tables caught in a reference cycle cannot be ordered; they are appended
/// after everything else in their original relative order and a warning is
/// logged. This function never fails.
pub fn insertion_order(tables: &[String], relationships: &[TableRelationship]) -> Vec<String> {
    let mut names: Vec<&str> = Vec::with_capacity(tables.len());
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(tables.len());
    for table in tables {
        if !index.contains_key(table.as_str()) {
            index.insert(table.as_str(), names.len());
            names.push(table.as_str());
        }
    }

    // referenced -> dependents
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); names.len()];
    for rel in relationships {
        let (Some(&child), Some(&parent)) = (
            index.get(rel.table_name.as_str()),
            index.get(rel.referenced_table.as_str()),
        ) else {
            continue;
        };
        if child != parent {
            dependents[parent].insert(child);
        }
    }

    let mut in_degree = vec![0usize; names.len()];
    for children in &dependents {
        for &child in children {
            in_degree[child] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut placed = vec![false; names.len()];
    let mut order: Vec<String> = Vec::with_capacity(names.len());

    while let Some(Reverse(idx)) = ready.pop() {
        placed[idx] = true;
        order.push(names[idx].to_string());
        for &child in &dependents[idx] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.push(Reverse(child));
            }
        }
    }

    if order.len() < names.len() {
        let unresolved: Vec<&str> = names
            .iter()
            .enumerate()
            .filter(|(i, _)| !placed[*i])
            .map(|(_, n)| *n)
            .collect();
        warn!(
            "Circular foreign-key references between {}; appending in original order",
            unresolved.join(", ")
        );
        order.extend(unresolved.into_iter().map(str::to_string));
    }

    debug!("Insertion order: {}", order.join(" -> "));
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// `table` references `referenced`.
    fn fk(table: &str, referenced: &str) -> TableRelationship {
        TableRelationship::new(table, referenced, format!("{referenced}_id"), "id")
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|t| t == name).unwrap()
    }

    #[test]
    fn test_blog_scenario() {
        let order = insertion_order(
            &tables(&["comments", "posts", "users"]),
            &[fk("posts", "users"), fk("comments", "posts"), fk("comments", "users")],
        );
        assert_eq!(order, tables(&["users", "posts", "comments"]));
    }

    #[test]
    fn test_no_relationships_keeps_input_order() {
        let input = tables(&["b", "a", "c"]);
        assert_eq!(insertion_order(&input, &[]), input);
    }

    #[test]
    fn test_ties_broken_by_input_order() {
        // Both x and y depend on root; y is listed first.
        let order = insertion_order(
            &tables(&["y", "x", "root"]),
            &[fk("x", "root"), fk("y", "root")],
        );
        assert_eq!(order, tables(&["root", "y", "x"]));
    }

    #[test]
    fn test_two_table_cycle() {
        let order = insertion_order(
            &tables(&["standalone", "a", "b"]),
            &[fk("a", "b"), fk("b", "a")],
        );
        assert_eq!(order, tables(&["standalone", "a", "b"]));
    }

    #[test]
    fn test_cycle_with_dependent_tail() {
        // c depends on the a<->b cycle, so it cannot be placed either.
        let order = insertion_order(
            &tables(&["c", "b", "a", "d"]),
            &[fk("a", "b"), fk("b", "a"), fk("c", "a")],
        );
        assert_eq!(order, tables(&["d", "c", "b", "a"]));
    }

    #[test]
    fn test_self_reference_ignored() {
        let order = insertion_order(
            &tables(&["employees", "departments"]),
            &[fk("employees", "employees"), fk("employees", "departments")],
        );
        assert_eq!(order, tables(&["departments", "employees"]));
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        // A cycle remnant would be pushed behind "audit".
        let order = insertion_order(
            &tables(&["employees", "audit"]),
            &[fk("employees", "employees")],
        );
        assert_eq!(order, tables(&["employees", "audit"]));
    }

    #[test]
    fn test_duplicate_edges_counted_once() {
        let order = insertion_order(
            &tables(&["orders", "customers"]),
            &[fk("orders", "customers"), fk("orders", "customers")],
        );
        assert_eq!(order, tables(&["customers", "orders"]));
    }

    #[test]
    fn test_dangling_references_ignored() {
        let order = insertion_order(
            &tables(&["orders"]),
            &[fk("orders", "customers"), fk("invoices", "orders")],
        );
        assert_eq!(order, tables(&["orders"]));
    }

    #[test]
    fn test_duplicate_table_names_collapsed() {
        let order = insertion_order(&tables(&["a", "b", "a"]), &[fk("a", "b")]);
        assert_eq!(order, tables(&["b", "a"]));
    }

    #[test]
    fn test_empty_input() {
        assert!(insertion_order(&[], &[fk("a", "b")]).is_empty());
    }

    #[test]
    fn test_permutation_and_topological_validity() {
        let names = tables(&["t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7"]);
        // Deterministic pseudo-random acyclic edge sets: only reference lower indices.
        for seed in 0u64..50 {
            let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let mut rels = Vec::new();
            for child in 1..names.len() {
                for parent in 0..child {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                    if (state >> 33) % 3 == 0 {
                        rels.push(fk(&names[child], &names[parent]));
                    }
                }
            }

            // Shuffle the input order as well.
            let mut input = names.clone();
            input.rotate_left((seed as usize) % names.len());
            if seed % 2 == 1 {
                input.reverse();
            }

            let order = insertion_order(&input, &rels);

            let mut sorted_order = order.clone();
            sorted_order.sort();
            let mut sorted_input = input.clone();
            sorted_input.sort();
            assert_eq!(sorted_order, sorted_input, "not a permutation for seed {seed}");

            for rel in &rels {
                assert!(
                    position(&order, &rel.referenced_table) < position(&order, &rel.table_name),
                    "{} must precede {} (seed {seed})",
                    rel.referenced_table,
                    rel.table_name
                );
            }
        }
    }
}
