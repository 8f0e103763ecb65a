use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use log::{debug, info};

use crate::errors::{TaskError, ToastError};

/// A dependency-driven task catalog: for every node it supplies the
/// prerequisite nodes, a completion predicate, and a run procedure. Run
/// procedures must be idempotent; the resolver always consults the
/// completion predicate before executing one.
#[async_trait]
pub trait TaskGraph: Sync {
    type Node: Clone + Eq + Hash + Display + Send + Sync;

    fn prerequisites(&self, node: &Self::Node) -> Vec<Self::Node>;

    async fn is_complete(&self, node: &Self::Node) -> Result<bool, ToastError>;

    async fn run(&self, node: &Self::Node) -> Result<(), ToastError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Resolving,
    Satisfied,
}

/// Depth-first resolver. A complete output short-circuits its whole
/// prerequisite subtree; otherwise prerequisites are satisfied first, the
/// node runs, and its output must exist afterwards. Resolution is strictly
/// sequential and aborts on the first failure.
pub struct Resolver<'a, G: TaskGraph> {
    graph: &'a G,
    states: HashMap<G::Node, VisitState>,
}

impl<'a, G: TaskGraph> Resolver<'a, G> {
    pub fn new(graph: &'a G) -> Self {
        Resolver {
            graph,
            states: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, node: &G::Node) -> Result<(), ToastError> {
        self.visit(node.clone()).await
    }

    fn visit(&mut self, node: G::Node) -> BoxFuture<'_, Result<(), ToastError>> {
        async move {
            match self.states.get(&node) {
                Some(VisitState::Satisfied) => return Ok(()),
                Some(VisitState::Resolving) => {
                    return Err(TaskError::CyclicDependency {
                        task: node.to_string(),
                    }
                    .into())
                }
                None => {}
            }

            if self.graph.is_complete(&node).await? {
                debug!("{node}: output already present, skipping");
                self.states.insert(node, VisitState::Satisfied);
                return Ok(());
            }

            self.states.insert(node.clone(), VisitState::Resolving);
            for dep in self.graph.prerequisites(&node) {
                self.visit(dep).await?;
            }

            info!("running {node}");
            self.graph.run(&node).await?;

            if !self.graph.is_complete(&node).await? {
                return Err(TaskError::OutputMissing {
                    task: node.to_string(),
                    output: node.to_string(),
                }
                .into());
            }
            self.states.insert(node, VisitState::Satisfied);
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    struct FakeGraph {
        deps: HashMap<&'static str, Vec<&'static str>>,
        complete: Mutex<HashSet<String>>,
        run_log: Mutex<Vec<String>>,
        // Nodes whose run procedure "forgets" to produce output.
        broken: HashSet<&'static str>,
    }

    impl FakeGraph {
        fn new(deps: &[(&'static str, &[&'static str])]) -> Self {
            FakeGraph {
                deps: deps.iter().map(|(n, d)| (*n, d.to_vec())).collect(),
                complete: Mutex::new(HashSet::new()),
                run_log: Mutex::new(vec![]),
                broken: HashSet::new(),
            }
        }

        fn mark_complete(&self, node: &str) {
            self.complete.lock().unwrap().insert(node.to_string());
        }

        fn runs(&self) -> Vec<String> {
            self.run_log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskGraph for FakeGraph {
        type Node = &'static str;

        fn prerequisites(&self, node: &&'static str) -> Vec<&'static str> {
            self.deps.get(node).cloned().unwrap_or_default()
        }

        async fn is_complete(&self, node: &&'static str) -> Result<bool, ToastError> {
            Ok(self.complete.lock().unwrap().contains(*node))
        }

        async fn run(&self, node: &&'static str) -> Result<(), ToastError> {
            self.run_log.lock().unwrap().push(node.to_string());
            if !self.broken.contains(node) {
                self.mark_complete(node);
            }
            Ok(())
        }
    }

    fn chain() -> FakeGraph {
        FakeGraph::new(&[
            ("download", &[]),
            ("convert", &["download"]),
            ("flatten", &["convert"]),
        ])
    }

    #[tokio::test]
    async fn prerequisites_run_before_dependents() {
        let graph = chain();
        Resolver::new(&graph).resolve(&"flatten").await.unwrap();
        assert_eq!(graph.runs(), vec!["download", "convert", "flatten"]);
    }

    #[tokio::test]
    async fn complete_output_short_circuits_subtree() {
        let graph = chain();
        graph.mark_complete("flatten");
        Resolver::new(&graph).resolve(&"flatten").await.unwrap();
        // Prerequisites were never even visited.
        assert!(graph.runs().is_empty());
    }

    #[tokio::test]
    async fn second_resolution_is_a_no_op() {
        let graph = chain();
        Resolver::new(&graph).resolve(&"flatten").await.unwrap();
        let first = graph.runs();
        Resolver::new(&graph).resolve(&"flatten").await.unwrap();
        assert_eq!(graph.runs(), first);
    }

    #[tokio::test]
    async fn diamond_runs_shared_prerequisite_once() {
        let graph = FakeGraph::new(&[
            ("base", &[]),
            ("left", &["base"]),
            ("right", &["base"]),
            ("top", &["left", "right"]),
        ]);
        Resolver::new(&graph).resolve(&"top").await.unwrap();
        let runs = graph.runs();
        assert_eq!(runs.iter().filter(|r| *r == "base").count(), 1);
        assert_eq!(runs.last().unwrap(), "top");
    }

    #[tokio::test]
    async fn cycle_is_detected() {
        let graph = FakeGraph::new(&[("a", &["b"]), ("b", &["a"])]);
        let err = Resolver::new(&graph).resolve(&"a").await.unwrap_err();
        assert!(matches!(
            err,
            ToastError::Task {
                source: TaskError::CyclicDependency { .. }
            }
        ));
    }

    #[tokio::test]
    async fn missing_output_after_run_fails() {
        let mut graph = chain();
        graph.broken.insert("convert");
        let err = Resolver::new(&graph).resolve(&"flatten").await.unwrap_err();
        assert!(matches!(
            err,
            ToastError::Task {
                source: TaskError::OutputMissing { .. }
            }
        ));
        // Resolution aborted before the dependent task.
        assert_eq!(graph.runs(), vec!["download", "convert"]);
    }
}
