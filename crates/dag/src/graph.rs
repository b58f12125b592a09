//! The graph container
//!
//! Node values live in a sharded concurrent map so parallel walks can read
//! and replace them without a global lock. Edges sit behind a single
//! read-write lock; they change far less often than values.

use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::node::{Edge, EdgeKind, Node};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Adjacency in both directions
#[derive(Debug, Default, Clone)]
struct Adjacency {
    /// source -> (dest -> kind)
    down: HashMap<NodeId, BTreeMap<NodeId, EdgeKind>>,
    /// dest -> (source -> kind)
    up: HashMap<NodeId, BTreeMap<NodeId, EdgeKind>>,
}

impl Adjacency {
    fn insert(&mut self, source: &NodeId, dest: &NodeId, kind: EdgeKind) {
        // a structural edge is never downgraded to a dependency
        let kind = match self.down.get(source).and_then(|d| d.get(dest)) {
            Some(EdgeKind::Parent) => EdgeKind::Parent,
            _ => kind,
        };
        self.down
            .entry(source.clone())
            .or_default()
            .insert(dest.clone(), kind);
        self.up
            .entry(dest.clone())
            .or_default()
            .insert(source.clone(), kind);
    }

    fn remove(&mut self, source: &NodeId, dest: &NodeId) {
        if let Some(d) = self.down.get_mut(source) {
            d.remove(dest);
            if d.is_empty() {
                self.down.remove(source);
            }
        }
        if let Some(u) = self.up.get_mut(dest) {
            u.remove(source);
            if u.is_empty() {
                self.up.remove(dest);
            }
        }
    }

    fn remove_node(&mut self, id: &NodeId) {
        let dests: Vec<NodeId> = self
            .down
            .get(id)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();
        for dest in dests {
            self.remove(id, &dest);
        }
        let sources: Vec<NodeId> = self
            .up
            .get(id)
            .map(|u| u.keys().cloned().collect())
            .unwrap_or_default();
        for source in sources {
            self.remove(&source, id);
        }
    }

    fn down_edges(&self, id: &NodeId) -> Vec<Edge> {
        self.down
            .get(id)
            .map(|d| {
                d.iter()
                    .map(|(dest, kind)| Edge::new(id.clone(), dest.clone(), *kind))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn up_edges(&self, id: &NodeId) -> Vec<Edge> {
        self.up
            .get(id)
            .map(|u| {
                u.iter()
                    .map(|(source, kind)| Edge::new(source.clone(), id.clone(), *kind))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn all(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .down
            .iter()
            .flat_map(|(source, dests)| {
                dests
                    .iter()
                    .map(|(dest, kind)| Edge::new(source.clone(), dest.clone(), *kind))
            })
            .collect();
        edges.sort();
        edges
    }
}

/// A concurrent, hierarchically named, acyclic graph
pub struct Graph<V> {
    values: DashMap<NodeId, Node<V>>,
    edges: RwLock<Adjacency>,
}

impl<V> Default for Graph<V> {
    fn default() -> Self {
        Self {
            values: DashMap::new(),
            edges: RwLock::new(Adjacency::default()),
        }
    }
}

impl<V> fmt::Debug for Graph<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges = self.read_edges();
        f.debug_struct("Graph")
            .field("nodes", &self.values.len())
            .field("edges", &edges.down.values().map(BTreeMap::len).sum::<usize>())
            .finish_non_exhaustive()
    }
}

impl<V> Graph<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_edges(&self) -> RwLockReadGuard<'_, Adjacency> {
        self.edges.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_edges(&self) -> RwLockWriteGuard<'_, Adjacency> {
        self.edges.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a node
    pub fn add(&self, node: Node<V>) {
        self.values.insert(node.id().clone(), node);
    }

    /// Insert a node below `parent` and connect the parent edge
    pub fn add_child(&self, parent: &NodeId, node: Node<V>) {
        let id = node.id().clone();
        self.add(node);
        self.connect(parent, &id, EdgeKind::Parent);
    }

    /// Remove a node and every edge touching it
    pub fn remove(&self, id: &NodeId) -> Option<Node<V>> {
        self.write_edges().remove_node(id);
        self.values.remove(id).map(|(_, node)| node)
    }

    /// A handle to the node (values are shared, not copied)
    pub fn get(&self, id: &NodeId) -> Option<Node<V>> {
        self.values.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.values.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Add an append-only metadata entry to an existing node
    pub fn add_metadata(&self, id: &NodeId, key: &str, value: serde_json::Value) -> Result<()> {
        let mut entry = self
            .values
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        entry.add_metadata(key, value)
    }

    /// Connect `from` to `to`; a repeated connect keeps one edge
    pub fn connect(&self, from: &NodeId, to: &NodeId, kind: EdgeKind) {
        self.write_edges().insert(from, to, kind);
    }

    pub fn disconnect(&self, from: &NodeId, to: &NodeId) {
        self.write_edges().remove(from, to);
    }

    /// Edges pointing at `id`
    pub fn up_edges(&self, id: &NodeId) -> Vec<Edge> {
        self.read_edges().up_edges(id)
    }

    /// Edges leaving `id`
    pub fn down_edges(&self, id: &NodeId) -> Vec<Edge> {
        self.read_edges().down_edges(id)
    }

    /// Every edge, sorted
    pub fn edges(&self) -> Vec<Edge> {
        self.read_edges().all()
    }

    /// Every node ID, sorted
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.values.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Every node, sorted by ID
    pub fn nodes(&self) -> Vec<Node<V>> {
        let mut nodes: Vec<Node<V>> = self.values.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    /// Direct structural children of `id`
    pub fn children(&self, id: &NodeId) -> Vec<NodeId> {
        self.down_edges(id)
            .into_iter()
            .filter(Edge::is_parent)
            .map(|e| e.dest)
            .collect()
    }

    /// Every node below `id` in the ID hierarchy
    pub fn descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let mut found: Vec<NodeId> = self
            .values
            .iter()
            .filter(|e| e.key().is_descendant_of(id))
            .map(|e| e.key().clone())
            .collect();
        found.sort();
        found
    }

    /// Transitive closure of down edges of any kind, excluding `id`
    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        let edges = self.read_edges();
        let mut seen = BTreeSet::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(dests) = edges.down.get(&current) {
                for dest in dests.keys() {
                    if dest != id && seen.insert(dest.clone()) {
                        stack.push(dest.clone());
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Whether `to` is reachable from `from` by following down edges
    pub fn reaches(&self, from: &NodeId, to: &NodeId) -> bool {
        from == to || self.dependencies(from).contains(to)
    }

    /// The root ID, if the graph has one
    pub fn root(&self) -> Result<NodeId> {
        let root = NodeId::root();
        if self.contains(&root) {
            Ok(root)
        } else {
            Err(Error::MissingRoot)
        }
    }

    /// Check the structural invariants
    ///
    /// The root exists and has no inbound edges, no edge dangles, every
    /// non-root node is attached to its parent, and there are no cycles.
    pub fn validate(&self) -> Result<()> {
        let root = self.root()?;
        let edges = self.read_edges();

        let inbound: Vec<NodeId> = edges
            .up
            .get(&root)
            .map(|u| u.keys().cloned().collect())
            .unwrap_or_default();
        if !inbound.is_empty() {
            return Err(Error::RootHasInbound(inbound));
        }

        let mut dangling = BTreeSet::new();
        for (source, dests) in &edges.down {
            if !self.contains(source) {
                dangling.insert(source.clone());
            }
            for dest in dests.keys() {
                if !self.contains(dest) {
                    dangling.insert(dest.clone());
                }
            }
        }
        if !dangling.is_empty() {
            return Err(Error::DanglingEdges(dangling.into_iter().collect()));
        }

        for id in self.ids() {
            if id.is_root() {
                continue;
            }
            let parent = id.parent().unwrap_or_else(NodeId::root);
            let attached = self.contains(&parent)
                && edges
                    .down
                    .get(&parent)
                    .and_then(|d| d.get(&id))
                    .is_some_and(|kind| *kind == EdgeKind::Parent);
            if !attached {
                return Err(Error::MissingParent { child: id, parent });
            }
        }

        search(&edges, &self.ids()).map(|_| ()).map_err(Error::Cycle)
    }

    /// Every node ID ordered leaves first: a node always comes after
    /// everything it points at
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let edges = self.read_edges();
        search(&edges, &self.ids()).map_err(Error::Cycle)
    }

    /// Shallow copy: value pointers are shared, edges are duplicated
    pub fn copy(&self) -> Self {
        let values = DashMap::with_capacity(self.values.len());
        for entry in &self.values {
            values.insert(entry.key().clone(), entry.value().clone());
        }
        Self {
            values,
            edges: RwLock::new(self.read_edges().clone()),
        }
    }
}

enum Mark {
    Visiting,
    Done,
}

/// Depth-first search over down edges
///
/// Returns the post-order of every reachable node, or the first cycle found
/// (with the entry node repeated at the end).
fn search(edges: &Adjacency, ids: &[NodeId]) -> std::result::Result<Vec<NodeId>, Vec<NodeId>> {
    let mut marks: HashMap<NodeId, Mark> = HashMap::with_capacity(ids.len());
    let mut order = Vec::with_capacity(ids.len());

    for start in ids {
        if marks.contains_key(start) {
            continue;
        }
        let mut path: Vec<NodeId> = vec![start.clone()];
        let mut frames: Vec<(Vec<NodeId>, usize)> = vec![(targets(edges, start), 0)];
        marks.insert(start.clone(), Mark::Visiting);

        while let Some((children, next)) = frames.last_mut() {
            if let Some(child) = children.get(*next).cloned() {
                *next += 1;
                match marks.get(&child) {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => {
                        let pos = path.iter().position(|p| *p == child).unwrap_or(0);
                        let mut cycle: Vec<NodeId> = path[pos..].to_vec();
                        cycle.push(child);
                        return Err(cycle);
                    }
                    None => {
                        marks.insert(child.clone(), Mark::Visiting);
                        frames.push((targets(edges, &child), 0));
                        path.push(child);
                    }
                }
            } else {
                frames.pop();
                if let Some(done) = path.pop() {
                    marks.insert(done.clone(), Mark::Done);
                    order.push(done);
                }
            }
        }
    }

    Ok(order)
}

fn targets(edges: &Adjacency, id: &NodeId) -> Vec<NodeId> {
    edges
        .down
        .get(id)
        .map(|d| d.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root -> a, root -> b, a depends on b
    fn sample() -> Graph<i32> {
        let g = Graph::new();
        let root = NodeId::root();
        g.add(Node::new(root.clone(), 0));
        g.add_child(&root, Node::new("root/a", 1));
        g.add_child(&root, Node::new("root/b", 2));
        g.connect(&"root/a".into(), &"root/b".into(), EdgeKind::Dependency);
        g
    }

    #[test]
    fn test_sample_validates() {
        sample().validate().unwrap();
    }

    #[test]
    fn test_debug_shows_counts() {
        assert_eq!(format!("{:?}", sample()), "Graph { nodes: 3, edges: 3, .. }");
    }

    #[test]
    fn test_adjacency_lookups() {
        let g = sample();
        let down = g.down_edges(&"root/a".into());
        assert_eq!(down, vec![Edge::new("root/a", "root/b", EdgeKind::Dependency)]);
        let up: Vec<NodeId> = g.up_edges(&"root/b".into()).into_iter().map(|e| e.source).collect();
        assert_eq!(up, vec![NodeId::root(), NodeId::from("root/a")]);
        assert_eq!(g.children(&NodeId::root()).len(), 2);
    }

    #[test]
    fn test_parent_edge_is_not_downgraded() {
        let g = sample();
        g.connect(&NodeId::root(), &"root/a".into(), EdgeKind::Dependency);
        assert!(g.down_edges(&NodeId::root()).iter().all(Edge::is_parent));
    }

    #[test]
    fn test_missing_root() {
        let g: Graph<i32> = Graph::new();
        assert!(matches!(g.validate(), Err(Error::MissingRoot)));
    }

    #[test]
    fn test_cycle_is_reported_with_participants() {
        let g = sample();
        g.connect(&"root/b".into(), &"root/a".into(), EdgeKind::Dependency);
        match g.validate() {
            Err(Error::Cycle(ids)) => {
                assert!(ids.contains(&"root/a".into()));
                assert!(ids.contains(&"root/b".into()));
                assert_eq!(ids.first(), ids.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dangling_edge_names_target() {
        let g = sample();
        g.connect(&"root/a".into(), &"root/missing".into(), EdgeKind::Dependency);
        match g.validate() {
            Err(Error::DanglingEdges(ids)) => assert_eq!(ids, vec![NodeId::from("root/missing")]),
            other => panic!("expected dangling edge, got {other:?}"),
        }
    }

    #[test]
    fn test_orphan_fails_validation() {
        let g = sample();
        g.add(Node::new("root/c", 3));
        assert!(matches!(g.validate(), Err(Error::MissingParent { .. })));
    }

    #[test]
    fn test_root_with_inbound_edge_fails() {
        let g = sample();
        g.connect(&"root/a".into(), &NodeId::root(), EdgeKind::Dependency);
        assert!(matches!(g.validate(), Err(Error::RootHasInbound(_))));
    }

    #[test]
    fn test_remove_drops_edges() {
        let g = sample();
        g.remove(&"root/b".into());
        assert!(g.down_edges(&"root/a".into()).is_empty());
        g.validate().unwrap();
    }

    #[test]
    fn test_descendants_and_dependencies() {
        let g = sample();
        g.add_child(&"root/a".into(), Node::new("root/a/x", 4));
        assert_eq!(g.descendants(&"root/a".into()), vec![NodeId::from("root/a/x")]);
        let deps = g.dependencies(&"root/a".into());
        assert_eq!(deps, vec![NodeId::from("root/a/x"), NodeId::from("root/b")]);
        assert!(g.reaches(&NodeId::root(), &"root/a/x".into()));
        assert!(!g.reaches(&"root/b".into(), &"root/a".into()));
    }

    #[test]
    fn test_topological_order_is_leaves_first() {
        let g = sample();
        let order = g.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o.as_str() == id).unwrap();
        assert!(pos("root/b") < pos("root/a"));
        assert!(pos("root/a") < pos("root"));
    }

    #[test]
    fn test_copy_shares_values_not_edges() {
        let g = sample();
        let copy = g.copy();
        copy.validate().unwrap();
        copy.disconnect(&"root/a".into(), &"root/b".into());
        assert_eq!(g.down_edges(&"root/a".into()).len(), 1);
        let original = g.get(&"root/a".into()).unwrap();
        let copied = copy.get(&"root/a".into()).unwrap();
        assert!(std::sync::Arc::ptr_eq(&original.value_arc(), &copied.value_arc()));
    }

    #[test]
    fn test_add_metadata_through_graph() {
        let g = sample();
        g.add_metadata(&"root/a".into(), "kind", serde_json::json!("task"))
            .unwrap();
        assert!(g
            .add_metadata(&"root/a".into(), "kind", serde_json::json!("file"))
            .is_err());
        assert!(matches!(
            g.add_metadata(&"root/zz".into(), "kind", serde_json::json!("x")),
            Err(Error::NotFound(_))
        ));
    }
}
