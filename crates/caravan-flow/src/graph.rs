//! Dependency graph with per-stage wait counters
//!
//! Each stage key maps to a node holding a counter and its edges. A
//! worker blocks in `wait` until a node's counter reaches zero and
//! decrements counters through `complete`; counters are initialized to
//! exactly the number of completions they will receive, so no central
//! scheduler is needed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::schema::Stages;

struct Node {
    count: AtomicUsize,
    notify: Notify,
    edges: Vec<String>,
}

impl Node {
    fn new(count: usize, edges: Vec<String>) -> Self {
        Self {
            count: AtomicUsize::new(count),
            notify: Notify::new(),
            edges,
        }
    }
}

/// A mapped set of wait counters for stage coordination
pub struct Depends {
    nodes: HashMap<String, Node>,
}

impl Depends {
    /// Forward orientation: every node expects its own completion and
    /// carries its `depends` as edges
    pub fn forward(stages: &Stages) -> Self {
        let nodes = stages
            .iter()
            .map(|(key, stage)| (key.clone(), Node::new(1, stage.depends.clone())))
            .collect();
        Self { nodes }
    }

    /// Reverse orientation: every node expects one completion per stage
    /// that depends on it
    pub fn reverse(stages: &Stages) -> Self {
        let mut dependents: HashMap<&str, usize> = HashMap::new();
        for stage in stages.values() {
            for dep in &stage.depends {
                *dependents.entry(dep.as_str()).or_default() += 1;
            }
        }

        let nodes = stages
            .keys()
            .map(|key| {
                let count = dependents.get(key.as_str()).copied().unwrap_or(0);
                (key.clone(), Node::new(count, Vec::new()))
            })
            .collect();
        Self { nodes }
    }

    /// Block until each named node's counter reaches zero
    pub async fn wait<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for key in keys {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            loop {
                let notified = node.notify.notified();
                tokio::pin!(notified);
                // register before the check so a concurrent complete
                // cannot slip between them
                notified.as_mut().enable();
                if node.count.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
        }
    }

    /// Decrement each named node's counter, waking waiters at zero
    pub fn complete<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for key in keys {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            let previous = node
                .count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                    count.checked_sub(1)
                });
            match previous {
                Ok(1) => node.notify.notify_waiters(),
                Ok(_) => {}
                Err(_) => debug_assert!(false, "node '{}' completed too many times", key),
            }
        }
    }

    /// True if the edge relation contains a cycle
    pub fn is_cyclic(&self) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut in_stack: HashSet<&str> = HashSet::new();

        for start in self.nodes.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }

            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            visited.insert(start);
            in_stack.insert(start);

            while let Some(frame) = stack.last_mut() {
                let (key, cursor) = *frame;
                let edges = &self.nodes[key].edges;

                if cursor < edges.len() {
                    frame.1 += 1;
                    let edge = edges[cursor].as_str();
                    if in_stack.contains(edge) {
                        return true;
                    }
                    if !visited.contains(edge) && self.nodes.contains_key(edge) {
                        visited.insert(edge);
                        in_stack.insert(edge);
                        stack.push((self.key_of(edge), 0));
                    }
                } else {
                    in_stack.remove(key);
                    stack.pop();
                }
            }
        }

        false
    }

    /// Borrow the graph-owned copy of a key so stack frames outlive the
    /// edge list they were found in
    fn key_of(&self, key: &str) -> &str {
        self.nodes
            .get_key_value(key)
            .map(|(k, _)| k.as_str())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn count(&self, key: &str) -> usize {
        self.nodes[key].count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Stage;

    fn stages_from(edges: &[(&str, &[&str])]) -> Stages {
        edges
            .iter()
            .map(|(key, deps)| {
                let mut stage = Stage::for_tests();
                stage.depends = deps.iter().map(|d| d.to_string()).collect();
                (key.to_string(), stage)
            })
            .collect()
    }

    #[test]
    fn test_cycle_detection() {
        let cases: Vec<(Stages, bool)> = vec![
            // acyclic
            (stages_from(&[("test1", &[])]), false),
            (stages_from(&[("test1", &[]), ("test2", &["test1"])]), false),
            // self loop
            (stages_from(&[("test1", &["test1"])]), true),
            // longer cycle
            (
                stages_from(&[
                    ("test1", &["test3"]),
                    ("test2", &["test1"]),
                    ("test3", &["test2"]),
                ]),
                true,
            ),
        ];

        for (stages, expected) in cases {
            let graph = Depends::forward(&stages);
            assert_eq!(graph.is_cyclic(), expected);
        }
    }

    #[test]
    fn test_forward_counters() {
        let stages = stages_from(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        let graph = Depends::forward(&stages);

        for key in ["a", "b", "c"] {
            assert_eq!(graph.count(key), 1);
        }
    }

    #[test]
    fn test_reverse_counters_are_in_degrees() {
        let stages = stages_from(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        let graph = Depends::reverse(&stages);

        assert_eq!(graph.count("a"), 2);
        assert_eq!(graph.count("b"), 1);
        assert_eq!(graph.count("c"), 0);
    }

    #[tokio::test]
    async fn test_wait_unblocks_on_complete() {
        let stages = stages_from(&[("a", &[]), ("b", &["a"])]);
        let graph = std::sync::Arc::new(Depends::forward(&stages));

        let waiter = {
            let graph = graph.clone();
            tokio::spawn(async move { graph.wait(["a"]).await })
        };

        graph.complete(["a"]);
        // each counter receives exactly its initial value of completions
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should unblock")
            .unwrap();
        assert_eq!(graph.count("a"), 0);
    }

    #[tokio::test]
    async fn test_wait_on_zero_counter_returns() {
        let stages = stages_from(&[("c", &[])]);
        let graph = Depends::reverse(&stages);
        // no dependents, so the counter starts at zero
        graph.wait(["c"]).await;
    }
}
