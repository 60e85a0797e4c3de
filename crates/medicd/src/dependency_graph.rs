//! Suite dependency graph: ordering, cycle detection and dependents.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use medic_core::SuiteSpec;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("suite dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Directed graph of suite ids. An edge `parent → child` means `child`
/// depends on `parent`. Self edges and edges to unknown suites are dropped;
/// validation reports those separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteGraph {
    /// Suite ids in declaration order.
    suites: Vec<String>,
    index: HashMap<String, usize>,
    parents_by_child: Vec<BTreeSet<usize>>,
    children_by_parent: Vec<BTreeSet<usize>>,
}

impl SuiteGraph {
    pub fn build(specs: &[SuiteSpec]) -> Self {
        let mut suites = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for spec in specs {
            if !index.contains_key(&spec.id) {
                index.insert(spec.id.clone(), suites.len());
                suites.push(spec.id.clone());
            }
        }

        let mut parents_by_child = vec![BTreeSet::new(); suites.len()];
        let mut children_by_parent = vec![BTreeSet::new(); suites.len()];
        for spec in specs {
            let Some(&child) = index.get(&spec.id) else {
                continue;
            };
            for parent in &spec.depends_on {
                let Some(&parent) = index.get(parent) else {
                    continue;
                };
                if parent == child {
                    continue;
                }
                parents_by_child[child].insert(parent);
                children_by_parent[parent].insert(child);
            }
        }

        Self {
            suites,
            index,
            parents_by_child,
            children_by_parent,
        }
    }

    pub fn len(&self) -> usize {
        self.suites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    pub fn contains(&self, suite: &str) -> bool {
        self.index.contains_key(suite)
    }

    /// Direct dependencies of `suite`, in declaration order.
    pub fn parents_of(&self, suite: &str) -> Vec<String> {
        self.index
            .get(suite)
            .map(|&i| self.names(&self.parents_by_child[i]))
            .unwrap_or_default()
    }

    /// Kahn's algorithm. Among suites that are ready at the same time, the
    /// one declared first runs first.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut remaining: Vec<usize> = self.parents_by_child.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.suites.len());
        while let Some(next) = ready.pop_first() {
            order.push(self.suites[next].clone());
            for &child in &self.children_by_parent[next] {
                remaining[child] -= 1;
                if remaining[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() == self.suites.len() {
            return Ok(order);
        }
        Err(GraphError::Cycle {
            path: self.find_cycle().unwrap_or_default(),
        })
    }

    /// A cycle as a path that starts and ends on the same suite.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.suites.len()];
        for start in 0..self.suites.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            // (node, remaining children) frames of an iterative DFS.
            let mut stack: Vec<(usize, Vec<usize>)> =
                vec![(start, self.children_by_parent[start].iter().rev().copied().collect())];
            marks[start] = Mark::InProgress;

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(child) => match marks[child] {
                        Mark::Unvisited => {
                            marks[child] = Mark::InProgress;
                            stack.push((
                                child,
                                self.children_by_parent[child].iter().rev().copied().collect(),
                            ));
                        }
                        Mark::InProgress => {
                            let from = stack.iter().position(|(n, _)| *n == child)?;
                            let mut path: Vec<String> = stack[from..]
                                .iter()
                                .map(|(n, _)| self.suites[*n].clone())
                                .collect();
                            path.push(self.suites[child].clone());
                            return Some(path);
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node] = Mark::Done;
                        stack.pop();
                    }
                }
            }
        }
        None
    }

    /// Every suite that depends on `suite` directly or transitively, in BFS order.
    pub fn dependents_of(&self, suite: &str) -> Vec<String> {
        let Some(&root) = self.index.get(suite) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut seen = HashSet::from([root]);
        let mut queue: VecDeque<usize> = self.children_by_parent[root].iter().copied().collect();
        for &child in &self.children_by_parent[root] {
            seen.insert(child);
        }

        while let Some(node) = queue.pop_front() {
            out.push(self.suites[node].clone());
            for &child in &self.children_by_parent[node] {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        out
    }

    fn names(&self, ids: &BTreeSet<usize>) -> Vec<String> {
        ids.iter().map(|&i| self.suites[i].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use medic_core::SuiteSpec;

    use super::{GraphError, SuiteGraph};

    fn suite(id: &str, depends_on: &[&str]) -> SuiteSpec {
        depends_on
            .iter()
            .fold(SuiteSpec::new(id), |spec, parent| spec.depends_on(*parent))
    }

    #[test]
    fn orders_dependencies_first_with_declaration_tiebreak() {
        let graph = SuiteGraph::build(&[
            suite("checkout", &["auth", "catalog"]),
            suite("catalog", &[]),
            suite("auth", &[]),
            suite("search", &["catalog"]),
        ]);

        let order = graph.topological_order().expect("acyclic");
        assert_eq!(order, vec!["catalog", "auth", "checkout", "search"]);
    }

    #[test]
    fn reports_cycle_path() {
        let graph = SuiteGraph::build(&[
            suite("a", &["c"]),
            suite("b", &["a"]),
            suite("c", &["b"]),
            suite("d", &[]),
        ]);

        let cycle = graph.find_cycle().expect("cycle present");
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);

        let err = graph.topological_order().expect_err("cycle is fatal");
        let GraphError::Cycle { path } = err;
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn ignores_self_and_unknown_dependencies() {
        let graph = SuiteGraph::build(&[suite("a", &["a", "ghost"]), suite("b", &["a"])]);
        assert!(graph.parents_of("a").is_empty());
        assert_eq!(graph.parents_of("b"), vec!["a"]);
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn dependents_are_transitive_in_bfs_order() {
        let graph = SuiteGraph::build(&[
            suite("t1", &[]),
            suite("t2", &["t1"]),
            suite("t3", &["t1"]),
            suite("t4", &["t2"]),
            suite("t5", &["t3", "t4"]),
        ]);

        assert_eq!(graph.dependents_of("t1"), vec!["t2", "t3", "t4", "t5"]);
        assert_eq!(graph.dependents_of("t4"), vec!["t5"]);
        assert!(graph.dependents_of("missing").is_empty());
    }
}
