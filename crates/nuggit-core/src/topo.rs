//! Stable topological traversal over the resource dependency graph.
//!
//! Kahn's algorithm: nodes without outstanding dependencies are ready; the
//! smallest ready [`NameDigest`] is emitted first, so the order is a total
//! function of the graph. When nodes remain after the ready set drains, a
//! final [`Error::Cycle`] names one residual edge.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::identity::NameDigest;

/// Dependency graph: node → the nodes it depends on.
pub type DepGraph = BTreeMap<NameDigest, BTreeSet<NameDigest>>;

pub struct TopoIter {
    deps: DepGraph,
    out_degree: BTreeMap<NameDigest, usize>,
    dependents: BTreeMap<NameDigest, Vec<NameDigest>>,
    ready: BTreeSet<NameDigest>,
    done: bool,
}

impl TopoIter {
    /// Dependencies that are not themselves nodes of `deps` are ignored.
    pub fn new(mut deps: DepGraph) -> Self {
        let nodes: BTreeSet<NameDigest> = deps.keys().cloned().collect();
        for edges in deps.values_mut() {
            edges.retain(|d| nodes.contains(d));
        }

        let mut out_degree = BTreeMap::new();
        let mut dependents: BTreeMap<NameDigest, Vec<NameDigest>> = BTreeMap::new();
        let mut ready = BTreeSet::new();
        for (nd, edges) in &deps {
            out_degree.insert(nd.clone(), edges.len());
            if edges.is_empty() {
                ready.insert(nd.clone());
            }
            for dep in edges {
                dependents.entry(dep.clone()).or_default().push(nd.clone());
            }
        }

        Self {
            deps,
            out_degree,
            dependents,
            ready,
            done: false,
        }
    }

    fn cycle_example(&self) -> Option<Error> {
        let (from, _) = self.out_degree.iter().find(|(_, n)| **n > 0)?;
        let to = self.deps.get(from)?.iter().find(|d| {
            self.out_degree.get(*d).is_some_and(|n| *n > 0)
        })?;
        Some(Error::Cycle {
            from: from.clone(),
            to: to.clone(),
        })
    }
}

impl Iterator for TopoIter {
    type Item = Result<NameDigest>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(nd) = self.ready.pop_first() else {
            self.done = true;
            return self.cycle_example().map(Err);
        };
        self.out_degree.remove(&nd);
        if let Some(dependents) = self.dependents.remove(&nd) {
            for dependent in dependents {
                if let Some(n) = self.out_degree.get_mut(&dependent) {
                    *n -= 1;
                    if *n == 0 {
                        self.ready.insert(dependent);
                    }
                }
            }
        }
        Some(Ok(nd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nd(name: &str) -> NameDigest {
        NameDigest::new(name)
    }

    fn graph(edges: &[(&str, &[&str])]) -> DepGraph {
        edges
            .iter()
            .map(|(n, deps)| (nd(n), deps.iter().map(|d| nd(d)).collect()))
            .collect()
    }

    #[test]
    fn test_dependencies_first() {
        let g = graph(&[("c", &["b"]), ("b", &["a"]), ("a", &[]), ("d", &["a", "c"])]);
        let order: Vec<_> = TopoIter::new(g).map(|r| r.unwrap()).collect();
        assert_eq!(order, vec![nd("a"), nd("b"), nd("c"), nd("d")]);
    }

    #[test]
    fn test_each_node_once_and_stable() {
        let g = graph(&[("x", &[]), ("b", &["x"]), ("a", &["x"]), ("z", &[])]);
        let order: Vec<_> = TopoIter::new(g.clone()).map(|r| r.unwrap()).collect();
        assert_eq!(order, vec![nd("x"), nd("a"), nd("b"), nd("z")]);
        let again: Vec<_> = TopoIter::new(g).map(|r| r.unwrap()).collect();
        assert_eq!(order, again);
    }

    #[test]
    fn test_missing_dependencies_ignored() {
        let g = graph(&[("a", &["ghost"])]);
        let order: Vec<_> = TopoIter::new(g).map(|r| r.unwrap()).collect();
        assert_eq!(order, vec![nd("a")]);
    }

    #[test]
    fn test_cycle_reported_last() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        let items: Vec<_> = TopoIter::new(g).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &nd("c"));
        match &items[1] {
            Err(Error::Cycle { from, to }) => {
                let pair = [from.name(), to.name()];
                assert!(pair.contains(&"a") && pair.contains(&"b"));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_loop() {
        let items: Vec<_> = TopoIter::new(graph(&[("a", &["a"])])).collect();
        assert!(matches!(&items[..], [Err(Error::Cycle { .. })]));
    }
}
