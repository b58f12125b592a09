//! Graph walks and transforms
//!
//! [`Graph::walk`] visits every node leaves first, one scoped worker thread
//! per node. A worker waits for its dependencies, then its children, and
//! only then runs the node function. If anything it waited on failed, the
//! worker fails with a dependency-failure sentinel instead of running; the
//! sentinel never shows up in the aggregated error.
//!
//! [`Graph::root_first_walk`] is sequential and visits parents before
//! children, re-queueing a node while any of its sibling dependencies is
//! still outstanding.

use crate::context::{Context, Signal};
use crate::error::{Error, NodeError, NodeErrors, Result};
use crate::graph::Graph;
use crate::id::{NodeId, are_siblings};
use crate::node::Node;
use log::trace;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, Scope};

/// Why a worker did not complete
enum Failure {
    /// Something it waited on failed
    DepFailed,
    /// The walk was cancelled
    Cancelled,
    /// The node function itself failed
    Own(anyhow::Error),
}

/// Marks a signal failed if the worker unwinds before finishing it
struct FinishOnDrop(Arc<Signal>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish(false);
    }
}

struct Walker<'a, V, F> {
    graph: &'a Graph<V>,
    ctx: &'a Context,
    f: &'a F,
    signals: Mutex<HashMap<NodeId, Arc<Signal>>>,
    errors: Mutex<Vec<NodeError>>,
}

impl<'a, V, F> Walker<'a, V, F>
where
    V: Send + Sync,
    F: Fn(&NodeId, &Node<V>) -> anyhow::Result<()> + Sync,
{
    fn new(graph: &'a Graph<V>, ctx: &'a Context, f: &'a F) -> Self {
        Self {
            graph,
            ctx,
            f,
            signals: Mutex::new(HashMap::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Start a worker for `id` unless one already exists
    fn schedule<'scope>(&'scope self, scope: &'scope Scope<'scope, '_>, id: &NodeId) -> Arc<Signal> {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = signals.get(id) {
            return Arc::clone(existing);
        }
        let signal = Arc::new(Signal::new());
        signals.insert(id.clone(), Arc::clone(&signal));
        drop(signals);

        if self.ctx.is_cancelled() {
            signal.finish(false);
            return signal;
        }

        trace!("scheduling {id}");
        let worker_id = id.clone();
        let worker_signal = Arc::clone(&signal);
        let spawned = thread::Builder::new()
            .name(format!("walk:{id}"))
            .spawn_scoped(scope, move || self.work(scope, &worker_id, worker_signal));
        if let Err(err) = spawned {
            self.record(id, anyhow::anyhow!("failed to start worker: {err}"));
            signal.finish(false);
        }
        signal
    }

    fn work<'scope>(&'scope self, scope: &'scope Scope<'scope, '_>, id: &NodeId, signal: Arc<Signal>) {
        let guard = FinishOnDrop(signal);
        let ok = match self.run(scope, id) {
            Ok(()) => true,
            Err(Failure::DepFailed) => {
                trace!("{id}: dependency failed");
                false
            }
            Err(Failure::Cancelled) => false,
            Err(Failure::Own(err)) => {
                self.record(id, err);
                false
            }
        };
        guard.0.finish(ok);
    }

    fn run<'scope>(
        &'scope self,
        scope: &'scope Scope<'scope, '_>,
        id: &NodeId,
    ) -> std::result::Result<(), Failure> {
        let (children, deps): (Vec<_>, Vec<_>) = self
            .graph
            .down_edges(id)
            .into_iter()
            .partition(|edge| edge.is_parent());

        self.await_all(scope, deps.iter().map(|edge| &edge.dest))?;
        self.await_all(scope, children.iter().map(|edge| &edge.dest))?;

        self.ctx.check().map_err(|_| Failure::Cancelled)?;
        let node = self
            .graph
            .get(id)
            .ok_or_else(|| Failure::Own(Error::NotFound(id.clone()).into()))?;
        (self.f)(id, &node).map_err(Failure::Own)
    }

    /// Schedule every target, then wait for all of them
    fn await_all<'scope, 'i>(
        &'scope self,
        scope: &'scope Scope<'scope, '_>,
        targets: impl Iterator<Item = &'i NodeId>,
    ) -> std::result::Result<(), Failure> {
        let signals: Vec<Arc<Signal>> = targets.map(|t| self.schedule(scope, t)).collect();
        let mut failed = false;
        for signal in signals {
            match signal.wait(self.ctx) {
                Ok(true) => {}
                Ok(false) => failed = true,
                Err(_) => return Err(Failure::Cancelled),
            }
        }
        if failed {
            Err(Failure::DepFailed)
        } else {
            Ok(())
        }
    }

    fn record(&self, id: &NodeId, error: anyhow::Error) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(NodeError {
                id: id.clone(),
                error,
            });
    }

    fn finish(self) -> Result<()> {
        if self.ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut errors = self.errors.into_inner().unwrap_or_else(PoisonError::into_inner);
        if errors.is_empty() {
            return Ok(());
        }
        errors.sort_by(|a, b| a.id.cmp(&b.id));
        Err(Error::Walk(NodeErrors::new(errors)))
    }
}

impl<V: Send + Sync> Graph<V> {
    /// Parallel leaves-first walk from the root
    ///
    /// `f` runs for a node only after every edge target of that node has
    /// completed successfully. Siblings without a mutual dependency run
    /// concurrently.
    pub fn walk<F>(&self, ctx: &Context, f: F) -> Result<()>
    where
        F: Fn(&NodeId, &Node<V>) -> anyhow::Result<()> + Sync,
    {
        let root = self.root()?;
        ctx.check()?;
        let walker = Walker::new(self, ctx, &f);
        thread::scope(|scope| {
            let signal = walker.schedule(scope, &root);
            // scope joins every worker; the root outcome is in the error list
            let _ = signal.wait(ctx);
        });
        walker.finish()
    }

    /// Sequential walk from the root down
    ///
    /// A node is visited only once its parent has been visited and all of
    /// its sibling dependencies are done. Nodes removed by `f` along the way
    /// are skipped.
    pub fn root_first_walk<F>(&self, ctx: &Context, mut f: F) -> Result<()>
    where
        F: FnMut(&NodeId, &Node<V>) -> anyhow::Result<()>,
    {
        let root = self.root()?;
        let mut queue = VecDeque::from([root.clone()]);
        let mut queued: HashSet<NodeId> = HashSet::from([root]);
        let mut done: HashSet<NodeId> = HashSet::new();
        let mut stalls = 0usize;

        while let Some(id) = queue.pop_front() {
            ctx.check()?;
            let Some(node) = self.get(&id) else {
                continue;
            };

            let waiting = self.down_edges(&id).into_iter().any(|edge| {
                !edge.is_parent()
                    && are_siblings(&id, &edge.dest)
                    && self.contains(&edge.dest)
                    && !done.contains(&edge.dest)
            });
            if waiting {
                trace!("{id}: still waiting on a sibling");
                queue.push_back(id);
                stalls += 1;
                if stalls > queue.len() {
                    return Err(Error::Stalled(queue.into_iter().collect()));
                }
                continue;
            }
            stalls = 0;

            f(&id, &node).map_err(|error| {
                Error::Walk(NodeErrors::new(vec![NodeError {
                    id: id.clone(),
                    error,
                }]))
            })?;

            for child in self.children(&id) {
                if queued.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
            done.insert(id);
        }
        Ok(())
    }

    /// Copy the graph, walk the copy leaves first, then validate it
    ///
    /// `f` receives the copy so it can replace node values in place.
    pub fn transform<F>(&self, ctx: &Context, f: F) -> Result<Self>
    where
        F: Fn(&Self, &NodeId, &Node<V>) -> anyhow::Result<()> + Sync,
    {
        let copy = self.copy();
        copy.walk(ctx, |id, node| f(&copy, id, node))?;
        copy.validate()?;
        Ok(copy)
    }

    /// Copy the graph, walk the copy root first, then validate it
    pub fn root_first_transform<F>(&self, ctx: &Context, mut f: F) -> Result<Self>
    where
        F: FnMut(&Self, &NodeId, &Node<V>) -> anyhow::Result<()>,
    {
        let copy = self.copy();
        copy.root_first_walk(ctx, |id, node| f(&copy, id, node))?;
        copy.validate()?;
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::EdgeKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    /// root -> {a, b, c}; a depends on b
    fn sample() -> Graph<&'static str> {
        let g = Graph::new();
        g.add(Node::new(NodeId::root(), "root"));
        for name in ["a", "b", "c"] {
            g.add_child(&NodeId::root(), Node::new(NodeId::root().child(name), name));
        }
        g.connect(&id("root/a"), &id("root/b"), EdgeKind::Dependency);
        g
    }

    fn order_of(g: &Graph<&'static str>) -> Vec<NodeId> {
        let order = Mutex::new(Vec::new());
        g.walk(&Context::new(), |id, _| {
            order.lock().unwrap().push(id.clone());
            Ok(())
        })
        .unwrap();
        order.into_inner().unwrap()
    }

    #[test]
    fn test_walk_visits_leaves_first() {
        let order = order_of(&sample());
        assert_eq!(order.len(), 4);
        let pos = |s: &str| order.iter().position(|o| o.as_str() == s).unwrap();
        assert!(pos("root/b") < pos("root/a"));
        assert_eq!(order.last(), Some(&NodeId::root()));
    }

    #[test]
    fn test_walk_runs_each_node_once() {
        let g = sample();
        g.connect(&id("root/c"), &id("root/b"), EdgeKind::Dependency);
        let count = AtomicUsize::new(0);
        g.walk(&Context::new(), |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_failed_dependency_reported_once() {
        let g = sample();
        let ran = Mutex::new(Vec::new());
        let err = g
            .walk(&Context::new(), |id, _| {
                ran.lock().unwrap().push(id.clone());
                if id.as_str() == "root/b" {
                    anyhow::bail!("b broke");
                }
                Ok(())
            })
            .unwrap_err();
        let errors = err.node_errors().unwrap();
        assert_eq!(errors.ids(), vec![&id("root/b")]);
        let ran = ran.into_inner().unwrap();
        assert!(!ran.contains(&id("root/a")));
        assert!(!ran.contains(&NodeId::root()));
        assert!(ran.contains(&id("root/c")));
    }

    #[test]
    fn test_siblings_run_concurrently() {
        let g = Graph::new();
        g.add(Node::new(NodeId::root(), "root"));
        g.add_child(&NodeId::root(), Node::new("root/x", "x"));
        g.add_child(&NodeId::root(), Node::new("root/y", "y"));
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        g.walk(&Context::new(), |id, _| {
            if id.is_root() {
                return Ok(());
            }
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancelled_walk_returns_cancelled() {
        let g = sample();
        let ctx = Context::new();
        let err = g
            .walk(&ctx, |id, _| {
                if id.as_str() == "root/b" {
                    ctx.cancel();
                }
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_walk_without_root_fails() {
        let g: Graph<&str> = Graph::new();
        assert!(matches!(g.walk(&Context::new(), |_, _| Ok(())), Err(Error::MissingRoot)));
    }

    #[test]
    fn test_root_first_walk_waits_for_siblings() {
        let g = sample();
        let mut order = Vec::new();
        g.root_first_walk(&Context::new(), |id, _| {
            order.push(id.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(order, vec!["root", "root/b", "root/c", "root/a"]);
    }

    #[test]
    fn test_root_first_walk_stalls_on_sibling_cycle() {
        let g = sample();
        g.connect(&id("root/b"), &id("root/a"), EdgeKind::Dependency);
        let err = g.root_first_walk(&Context::new(), |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Stalled(_)));
    }

    #[test]
    fn test_transform_replaces_values_on_copy() {
        let g = sample();
        let out = g
            .transform(&Context::new(), |graph, _, node| {
                graph.add(node.with_value("seen"));
                Ok(())
            })
            .unwrap();
        assert!(out.nodes().iter().all(|n| *n.value() == "seen"));
        assert_eq!(*g.get(&id("root/a")).unwrap().value(), "a");
    }

    #[test]
    fn test_root_first_transform_can_remove_nodes() {
        let g = sample();
        let out = g
            .root_first_transform(&Context::new(), |graph, id, _| {
                if id.as_str() == "root/c" {
                    graph.remove(id);
                }
                Ok(())
            })
            .unwrap();
        assert!(!out.contains(&id("root/c")));
        assert!(g.contains(&id("root/c")));
    }
}
