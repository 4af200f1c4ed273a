//! Dependency ordering for generated scripts.
//!
//! Builds a dependency graph over the scripts of one generation run and
//! produces a deterministic topological order: dependencies first, with a
//! fixed tie-break among ready nodes (entity kind creation weight, then
//! declared position, then name). Cycles are detected and reported with
//! the names of the entities on the cycle.

use std::collections::HashMap;

use crate::catalog::EntityKind;

/// A node in the dependency graph
#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// Unique node name (the script name)
    pub name: String,
    /// Entity kind, used for the creation-order weight
    pub kind: EntityKind,
    /// Declared position within the kind, used as the in-kind tie-break
    pub declared_index: usize,
    /// Names of nodes that must come first
    pub dependencies: Vec<String>,
}

/// Topologically sort the nodes, dependencies first
///
/// The sort is deterministic: among nodes whose dependencies are all
/// satisfied, the one with the lowest (creation weight, declared index,
/// name) triple runs next.
///
/// # Errors
///
/// Returns the names of entities forming a cycle when the graph is not a
/// DAG. No partial order is produced in that case.
pub fn topological_sort(nodes: &[DependencyNode]) -> Result<Vec<String>, Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for node in nodes {
        in_degree.insert(&node.name, node.dependencies.len());
        dependents.entry(&node.name).or_default();
    }
    for node in nodes {
        for dep in &node.dependencies {
            if let Some(list) = dependents.get_mut(dep.as_str()) {
                list.push(&node.name);
            }
        }
    }

    let sort_key = |name: &str| {
        let node = nodes.iter().find(|n| n.name == name).unwrap();
        (node.kind.creation_weight(), node.declared_index, node.name.clone())
    };

    // Ready set kept sorted so the tie-break is stable regardless of
    // insertion order.
    let mut ready: Vec<&str> = nodes
        .iter()
        .filter(|n| n.dependencies.is_empty())
        .map(|n| n.name.as_str())
        .collect();
    ready.sort_by_key(|name| sort_key(name));

    let mut result = Vec::with_capacity(nodes.len());
    while !ready.is_empty() {
        let current = ready.remove(0);
        result.push(current.to_string());

        let mut unlocked = Vec::new();
        if let Some(list) = dependents.get(current) {
            for dependent in list {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    unlocked.push(*dependent);
                }
            }
        }
        ready.extend(unlocked);
        ready.sort_by_key(|name| sort_key(name));
    }

    if result.len() != nodes.len() {
        return Err(find_cycle(nodes, &result));
    }
    Ok(result)
}

/// Walk the unsorted remainder with visiting/visited marks and extract the
/// names on one cycle
fn find_cycle(nodes: &[DependencyNode], sorted: &[String]) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Visited,
    }

    let by_name: HashMap<&str, &DependencyNode> =
        nodes.iter().map(|n| (n.name.as_str(), n)).collect();
    let mut marks: HashMap<&str, Mark> = nodes
        .iter()
        .map(|n| (n.name.as_str(), Mark::Unvisited))
        .collect();
    for name in sorted {
        marks.insert(name.as_str(), Mark::Visited);
    }

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a DependencyNode>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(name).copied() {
            Some(Mark::Visited) | None => return None,
            Some(Mark::Visiting) => {
                // Found the back edge; the cycle is the stack suffix
                // starting at the revisited node.
                let start = stack.iter().position(|n| *n == name).unwrap_or(0);
                return Some(stack[start..].iter().map(|s| (*s).to_string()).collect());
            }
            Some(Mark::Unvisited) => {}
        }
        marks.insert(name, Mark::Visiting);
        stack.push(name);
        if let Some(node) = by_name.get(name) {
            for dep in &node.dependencies {
                if let Some(cycle) = visit(dep.as_str(), by_name, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(name, Mark::Visited);
        None
    }

    let mut names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
    names.sort_unstable();
    for name in names {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(name, &by_name, &mut marks, &mut stack) {
            return cycle;
        }
    }

    // Unreachable when called after an incomplete sort, but return the
    // unsorted remainder rather than panic.
    nodes
        .iter()
        .filter(|n| !sorted.contains(&n.name))
        .map(|n| n.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, kind: EntityKind, index: usize, deps: &[&str]) -> DependencyNode {
        DependencyNode {
            name: name.to_string(),
            kind,
            declared_index: index,
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    #[test]
    fn test_topological_sort_simple_chain() {
        let nodes = vec![
            node("banks", EntityKind::Table, 0, &[]),
            node("bank_accounts", EntityKind::Table, 1, &["banks"]),
            node("bank_transactions", EntityKind::Table, 2, &["bank_accounts"]),
        ];
        let sorted = topological_sort(&nodes).unwrap();
        assert_eq!(sorted, vec!["banks", "bank_accounts", "bank_transactions"]);
    }

    #[test]
    fn test_topological_sort_respects_kind_weights() {
        // Declared out of order on purpose: the index is ready from the
        // start but must not run before any ready table.
        let nodes = vec![
            node("idx_a", EntityKind::Index, 0, &[]),
            node("fn_a", EntityKind::Function, 0, &[]),
            node("t_a", EntityKind::Table, 0, &[]),
            node("p_a", EntityKind::Policy, 0, &[]),
        ];
        let sorted = topological_sort(&nodes).unwrap();
        assert_eq!(sorted, vec!["t_a", "idx_a", "p_a", "fn_a"]);
    }

    #[test]
    fn test_topological_sort_ties_break_by_declared_index() {
        let nodes = vec![
            node("zeta", EntityKind::Table, 0, &[]),
            node("alpha", EntityKind::Table, 1, &[]),
        ];
        // Declared order wins over name order.
        assert_eq!(topological_sort(&nodes).unwrap(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_topological_sort_is_deterministic() {
        let nodes = vec![
            node("t_b", EntityKind::Table, 1, &[]),
            node("t_a", EntityKind::Table, 0, &[]),
            node("idx_b", EntityKind::Index, 1, &["t_b"]),
            node("idx_a", EntityKind::Index, 0, &["t_a"]),
        ];
        let first = topological_sort(&nodes).unwrap();
        let second = topological_sort(&nodes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["t_a", "t_b", "idx_a", "idx_b"]);
    }

    #[test]
    fn test_cycle_is_reported_with_member_names() {
        let nodes = vec![
            node("a", EntityKind::Table, 0, &["b"]),
            node("b", EntityKind::Table, 1, &["c"]),
            node("c", EntityKind::Table, 2, &["a"]),
        ];
        let err = topological_sort(&nodes).unwrap_err();
        assert_eq!(err.len(), 3);
        for name in ["a", "b", "c"] {
            assert!(err.contains(&name.to_string()), "cycle should name '{name}'");
        }
    }

    #[test]
    fn test_cycle_excludes_nodes_outside_the_cycle() {
        let nodes = vec![
            node("a", EntityKind::Table, 0, &["b"]),
            node("b", EntityKind::Table, 1, &["a"]),
            node("downstream", EntityKind::Table, 2, &["a"]),
        ];
        let err = topological_sort(&nodes).unwrap_err();
        assert!(err.contains(&"a".to_string()));
        assert!(err.contains(&"b".to_string()));
        assert!(!err.contains(&"downstream".to_string()));
    }
}
