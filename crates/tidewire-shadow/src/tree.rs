use std::collections::{HashMap, HashSet};

use slab::Slab;
use tidewire_proto::{ComponentId, EventHandlerId};

use crate::error::ApplyError;
use crate::node::{LogicalNode, NodeId, NodeKind, SnapshotNode};

/// Arena of logical nodes plus the component and event-handler bookkeeping
/// that edits update.
///
/// Every node except the root container has exactly one parent. Detached
/// nodes only exist transiently while a frame is being materialized.
#[derive(Debug)]
pub struct ShadowTree {
    nodes: Slab<LogicalNode>,
    root: NodeId,
    components: HashMap<ComponentId, NodeId>,
    event_handlers: HashSet<EventHandlerId>,
}

impl ShadowTree {
    pub fn new() -> Self {
        let mut nodes = Slab::with_capacity(64);
        let root = nodes.insert(LogicalNode::new(NodeKind::Container));
        Self {
            nodes,
            root,
            components: HashMap::new(),
            event_handlers: HashSet::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, including the root container.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn get(&self, id: NodeId) -> Option<&LogicalNode> {
        self.nodes.get(id)
    }

    pub fn kind(&self, id: NodeId) -> Result<&NodeKind, ApplyError> {
        self.nodes
            .get(id)
            .map(|node| &node.kind)
            .ok_or(ApplyError::StaleNode(id))
    }

    pub(crate) fn kind_mut(&mut self, id: NodeId) -> Result<&mut NodeKind, ApplyError> {
        self.nodes
            .get_mut(id)
            .map(|node| &mut node.kind)
            .ok_or(ApplyError::StaleNode(id))
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], ApplyError> {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .ok_or(ApplyError::StaleNode(id))
    }

    pub fn child_at(&self, parent: NodeId, index: usize) -> Result<NodeId, ApplyError> {
        let children = self.children(parent)?;
        children
            .get(index)
            .copied()
            .ok_or(ApplyError::OutOfRangeIndex {
                index,
                len: children.len(),
            })
    }

    /// Inserts a new node as the `index`-th child of `parent`.
    pub fn insert(
        &mut self,
        parent: NodeId,
        index: usize,
        kind: NodeKind,
    ) -> Result<NodeId, ApplyError> {
        self.check_insert_position(parent, index)?;
        let child = self.nodes.insert(LogicalNode::new(kind));
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.insert(index, child);
        Ok(child)
    }

    pub(crate) fn check_insert_position(
        &self,
        parent: NodeId,
        index: usize,
    ) -> Result<(), ApplyError> {
        let kind = self.kind(parent)?;
        if !kind.has_children() {
            return Err(ApplyError::InvalidEditTarget {
                edit: tidewire_proto::EditKind::PrependFrame,
                expected: "container",
                found: kind.label(),
            });
        }
        let len = self.nodes[parent].children.len();
        if index > len {
            return Err(ApplyError::OutOfRangeIndex { index, len });
        }
        Ok(())
    }

    pub(crate) fn create_detached(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.insert(LogicalNode::new(kind))
    }

    pub(crate) fn append_child(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let child = self.nodes.insert(LogicalNode::new(kind));
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        child
    }

    /// Moves every child of the detached node `from` under `to` starting at
    /// `index`, then frees `from`.
    pub(crate) fn graft(&mut self, from: NodeId, to: NodeId, index: usize) {
        let moved = std::mem::take(&mut self.nodes[from].children);
        for child in &moved {
            self.nodes[*child].parent = Some(to);
        }
        self.nodes[to].children.splice(index..index, moved);
        self.nodes.remove(from);
    }

    /// Removes the `index`-th child of `parent` along with its subtree.
    pub fn remove(&mut self, parent: NodeId, index: usize) -> Result<(), ApplyError> {
        let child = self.child_at(parent, index)?;
        self.nodes[parent].children.remove(index);
        self.free_subtree(child);
        Ok(())
    }

    /// Frees `node` and its descendants. The caller unlinks `node` from its
    /// parent first.
    pub(crate) fn free_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let Some(removed) = self.nodes.try_remove(id) else {
                continue;
            };
            if let NodeKind::Component { component_id } = removed.kind {
                if self.components.get(&component_id) == Some(&id) {
                    self.components.remove(&component_id);
                }
            }
            stack.extend(removed.children);
        }
    }

    /// Reorders children of `parent`: each `(from, to)` moves the child at
    /// `from` to position `to`. All moves apply at once, and nothing changes
    /// unless the pairs form a permutation.
    pub fn permute(&mut self, parent: NodeId, moves: &[(usize, usize)]) -> Result<(), ApplyError> {
        let len = self.children(parent)?.len();
        let mut sources = vec![false; len];
        let mut targets = vec![false; len];
        for &(from, to) in moves {
            if from >= len {
                return Err(ApplyError::OutOfRangeIndex { index: from, len });
            }
            if to >= len {
                return Err(ApplyError::OutOfRangeIndex { index: to, len });
            }
            if std::mem::replace(&mut sources[from], true) {
                return Err(ApplyError::InvalidPermutation("duplicate source index"));
            }
            if std::mem::replace(&mut targets[to], true) {
                return Err(ApplyError::InvalidPermutation("duplicate target index"));
            }
        }
        if sources != targets {
            return Err(ApplyError::InvalidPermutation(
                "sources and targets cover different positions",
            ));
        }

        let children = &mut self.nodes[parent].children;
        let original = children.clone();
        for &(from, to) in moves {
            children[to] = original[from];
        }
        Ok(())
    }

    /// Appends a component placeholder under the root and registers it. An
    /// already attached component keeps its existing node.
    pub fn attach_root_component(&mut self, component_id: ComponentId) -> NodeId {
        if let Some(existing) = self.components.get(&component_id) {
            return *existing;
        }
        let root = self.root;
        let node = self.append_child(root, NodeKind::Component { component_id });
        self.components.insert(component_id, node);
        node
    }

    pub fn component_container(&self, component_id: ComponentId) -> Option<NodeId> {
        self.components.get(&component_id).copied()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub(crate) fn register_component(&mut self, component_id: ComponentId, node: NodeId) {
        if let Some(previous) = self.components.insert(component_id, node) {
            if previous != node {
                tracing::debug!(
                    target = "tidewire::shadow",
                    component_id,
                    previous,
                    node,
                    "component re-registered to a new node"
                );
            }
        }
    }

    /// Drops the registry entry for `component_id` and frees its node if it
    /// is still part of the tree.
    pub fn dispose_component(&mut self, component_id: ComponentId) -> bool {
        let Some(node) = self.components.remove(&component_id) else {
            return false;
        };
        if let Some(parent) = self.nodes.get(node).and_then(|n| n.parent) {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.retain(|child| *child != node);
            }
        }
        self.free_subtree(node);
        true
    }

    pub(crate) fn register_event_handler(&mut self, handler_id: EventHandlerId) {
        self.event_handlers.insert(handler_id);
    }

    pub fn release_event_handler(&mut self, handler_id: EventHandlerId) -> bool {
        self.event_handlers.remove(&handler_id)
    }

    pub fn has_event_handler(&self, handler_id: EventHandlerId) -> bool {
        self.event_handlers.contains(&handler_id)
    }

    pub fn event_handler_count(&self) -> usize {
        self.event_handlers.len()
    }

    pub fn snapshot(&self, node: NodeId) -> Option<SnapshotNode> {
        let logical = self.nodes.get(node)?;
        let children = logical
            .children
            .iter()
            .filter_map(|child| self.snapshot(*child))
            .collect();
        Some(SnapshotNode {
            kind: logical.kind.clone(),
            children,
        })
    }

    pub fn snapshot_root(&self) -> SnapshotNode {
        self.snapshot(self.root)
            .unwrap_or_else(|| SnapshotNode::leaf(NodeKind::Container))
    }
}

impl Default for ShadowTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> NodeKind {
        NodeKind::Text {
            content: content.into(),
        }
    }

    fn child_texts(tree: &ShadowTree, parent: NodeId) -> Vec<String> {
        tree.children(parent)
            .unwrap()
            .iter()
            .map(|id| match tree.kind(*id).unwrap() {
                NodeKind::Text { content } => content.clone(),
                other => other.label().to_string(),
            })
            .collect()
    }

    #[test_timeout::timeout]
    fn insert_and_remove_keep_order() {
        let mut tree = ShadowTree::new();
        let root = tree.root();
        tree.insert(root, 0, text("b")).unwrap();
        tree.insert(root, 0, text("a")).unwrap();
        tree.insert(root, 2, text("c")).unwrap();
        assert_eq!(child_texts(&tree, root), ["a", "b", "c"]);

        tree.remove(root, 1).unwrap();
        assert_eq!(child_texts(&tree, root), ["a", "c"]);
        assert_eq!(tree.len(), 3);

        assert_eq!(
            tree.insert(root, 5, text("x")),
            Err(ApplyError::OutOfRangeIndex { index: 5, len: 2 })
        );
        assert_eq!(
            tree.remove(root, 2),
            Err(ApplyError::OutOfRangeIndex { index: 2, len: 2 })
        );
    }

    #[test_timeout::timeout]
    fn removing_a_subtree_releases_nested_components() {
        let mut tree = ShadowTree::new();
        let outer = tree.attach_root_component(1);
        let div = tree.insert(outer, 0, NodeKind::element("div")).unwrap();
        let inner = tree.insert(div, 0, NodeKind::Component { component_id: 2 }).unwrap();
        tree.register_component(2, inner);
        assert_eq!(tree.component_count(), 2);

        tree.remove(outer, 0).unwrap();
        assert_eq!(tree.component_container(2), None);
        assert_eq!(tree.component_container(1), Some(outer));
        assert_eq!(tree.len(), 2);
    }

    #[test_timeout::timeout]
    fn permute_moves_all_pairs_at_once() {
        let mut tree = ShadowTree::new();
        let root = tree.root();
        for (i, label) in ["a", "b", "c"].iter().enumerate() {
            tree.insert(root, i, text(label)).unwrap();
        }
        tree.permute(root, &[(0, 2), (2, 0)]).unwrap();
        assert_eq!(child_texts(&tree, root), ["c", "b", "a"]);

        tree.permute(root, &[(0, 1), (1, 2), (2, 0)]).unwrap();
        assert_eq!(child_texts(&tree, root), ["a", "c", "b"]);
    }

    #[test_timeout::timeout]
    fn invalid_permutations_leave_children_untouched() {
        let mut tree = ShadowTree::new();
        let root = tree.root();
        for (i, label) in ["a", "b", "c"].iter().enumerate() {
            tree.insert(root, i, text(label)).unwrap();
        }
        assert!(matches!(
            tree.permute(root, &[(0, 1)]),
            Err(ApplyError::InvalidPermutation(_))
        ));
        assert!(matches!(
            tree.permute(root, &[(0, 1), (0, 2)]),
            Err(ApplyError::InvalidPermutation(_))
        ));
        assert_eq!(
            tree.permute(root, &[(0, 3), (3, 0)]),
            Err(ApplyError::OutOfRangeIndex { index: 3, len: 3 })
        );
        assert_eq!(child_texts(&tree, root), ["a", "b", "c"]);
    }

    #[test_timeout::timeout]
    fn disposing_an_attached_component_frees_it() {
        let mut tree = ShadowTree::new();
        let node = tree.attach_root_component(9);
        assert_eq!(tree.attach_root_component(9), node);
        tree.insert(node, 0, text("hi")).unwrap();

        assert!(tree.dispose_component(9));
        assert!(!tree.dispose_component(9));
        assert!(tree.is_empty());
        assert!(tree.children(tree.root()).unwrap().is_empty());
    }
}
