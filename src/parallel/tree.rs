//! Dynamic fan-out over a binary tree.
//!
//! Nodes live in an arena and own their child edges by index. [`traverse`]
//! spawns one task per node operation and one per child edge. Every node
//! keeps a join counter (its own operation plus one per child); the node is
//! complete when the counter reaches zero, and only then counts down its
//! parent. The call returns once the root, and with it the whole tree, is
//! complete.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::{Error, Result};

/// Index of a node in a [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct Node<T> {
    payload: T,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

/// A binary tree stored as an arena; the root is created with the tree.
#[derive(Debug)]
pub struct Tree<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Tree<T> {
    /// Create a tree holding only a root
    pub fn new(root: T) -> Self {
        Self {
            nodes: vec![Node {
                payload: root,
                parent: None,
                left: None,
                right: None,
            }],
        }
    }

    /// The root node
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree has at least its root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach a new left child to `parent`
    pub fn add_left(&mut self, parent: NodeId, payload: T) -> Result<NodeId> {
        self.attach(parent, payload, "left")
    }

    /// Attach a new right child to `parent`
    pub fn add_right(&mut self, parent: NodeId, payload: T) -> Result<NodeId> {
        self.attach(parent, payload, "right")
    }

    fn attach(&mut self, parent: NodeId, payload: T, side: &'static str) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        let node = self
            .nodes
            .get_mut(parent.0)
            .ok_or(Error::UnknownNode(parent.0))?;
        let edge = if side == "left" {
            &mut node.left
        } else {
            &mut node.right
        };
        if edge.is_some() {
            return Err(Error::EdgeOccupied {
                parent: parent.0,
                side,
            });
        }
        *edge = Some(id);
        self.nodes.push(Node {
            payload,
            parent: Some(parent),
            left: None,
            right: None,
        });
        Ok(id)
    }

    /// Payload of a node
    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id.0).map(|node| &node.payload)
    }

    pub fn left(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.left)
    }

    pub fn right(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.right)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.parent)
    }

    /// Owned children of a node, left first
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.left(id).into_iter().chain(self.right(id))
    }
}

/// Result of a [`traverse`] call
#[derive(Debug, Clone)]
pub struct Traversal {
    completion_order: Vec<NodeId>,
}

impl Traversal {
    /// Nodes in the order they completed (operation and subtree done)
    pub fn completion_order(&self) -> &[NodeId] {
        &self.completion_order
    }

    /// Whether `first` completed before `second`
    pub fn completed_before(&self, first: NodeId, second: NodeId) -> bool {
        let position = |id| self.completion_order.iter().position(|n| *n == id);
        match (position(first), position(second)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

struct Fanout<'t, T, F> {
    tree: &'t Tree<T>,
    op: &'t F,
    pending: Vec<AtomicUsize>,
    completed: Mutex<Vec<NodeId>>,
}

impl<'t, T, F> Fanout<'t, T, F>
where
    T: Sync,
    F: Fn(NodeId, &T) + Sync,
{
    fn spawn_subtree<'s>(&'s self, scope: &rayon::Scope<'s>, id: NodeId) {
        scope.spawn(move |_| {
            if let Some(payload) = self.tree.get(id) {
                (self.op)(id, payload);
            }
            self.count_down(id);
        });
        for child in self.tree.children(id) {
            scope.spawn(move |scope| self.spawn_subtree(scope, child));
        }
    }

    fn count_down(&self, id: NodeId) {
        if self.pending[id.0].fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        tracing::debug!(node = id.index(), "node complete");
        self.completed.lock().push(id);
        if let Some(parent) = self.tree.parent(id) {
            self.count_down(parent);
        }
    }
}

/// Run `op` once for every node, in parallel, with attached-to-parent joins.
///
/// Blocks until every node's operation has finished. The returned
/// [`Traversal`] lists nodes in completion order; a node always completes
/// after all of its descendants.
pub fn traverse<T, F>(tree: &Tree<T>, op: F) -> Traversal
where
    T: Sync,
    F: Fn(NodeId, &T) + Sync,
{
    let fanout = Fanout {
        tree,
        op: &op,
        pending: (0..tree.len())
            .map(|i| AtomicUsize::new(1 + tree.children(NodeId(i)).count()))
            .collect(),
        completed: Mutex::new(Vec::with_capacity(tree.len())),
    };

    rayon::scope(|scope| fanout.spawn_subtree(scope, tree.root()));

    Traversal {
        completion_order: fanout.completed.into_inner(),
    }
}
