//! The node arena: parent links, paths, snapshots and capture/restore.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    iter,
    sync::atomic::{AtomicU64, Ordering},
};

use slotmap::SlotMap;

use crate::core::{
    NodeId,
    error::{Error, Result},
    node::{Node, NodeState, collect_nodes},
    value::Value,
};

/// Last issued display serial, shared by every tree in the process.
static CURRENT_SERIAL: AtomicU64 = AtomicU64::new(0);

/// Restorable copy of every node's persisted state. A capture stays open
/// until it is passed to [`Tree::restore`] or [`Tree::commit`]; nodes removed
/// while any capture is open are kept so a restore can revive them.
#[derive(Debug)]
pub struct TreeCapture {
    /// Node states by id.
    states: HashMap<NodeId, NodeState>,
    /// Root of the owning store when the capture was taken.
    pub(crate) root: Option<NodeId>,
}

impl TreeCapture {
    /// Was this node alive when the capture was taken?
    pub fn contains(&self, id: NodeId) -> bool {
        self.states.contains_key(&id)
    }
}

/// What a restore changed.
#[derive(Debug, Default)]
pub(crate) struct Restored {
    /// Live nodes created since the capture.
    pub(crate) created: Vec<NodeId>,
    /// Nodes removed since the capture and brought back.
    pub(crate) revived: Vec<NodeId>,
}

/// Arena of plugin instances.
#[derive(Debug)]
pub struct Tree {
    /// Nodes by id, including retired nodes.
    nodes: SlotMap<NodeId, Node>,
    /// Nodes removed while a capture was open. They are invisible to every
    /// accessor and dropped once the last capture closes.
    retired: HashSet<NodeId>,
    /// Number of open captures.
    holds: usize,
    /// Effects only run while the tree is protected.
    protected: bool,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// An empty, protected tree.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            retired: HashSet::new(),
            holds: 0,
            protected: true,
        }
    }

    /// Insert a node and assign its display id. Display ids are unique
    /// across every tree in the process.
    pub(crate) fn insert(&mut self, mut node: Node) -> NodeId {
        let serial = CURRENT_SERIAL.fetch_add(1, Ordering::Relaxed) + 1;
        node.node_id = format!("_{serial}");
        self.nodes.insert(node)
    }

    /// Remove a node from the arena. While a capture is open the node is
    /// retired instead, so that a restore can revive it.
    pub(crate) fn remove(&mut self, id: NodeId) {
        if self.holds > 0 {
            if self.nodes.contains_key(id) {
                self.retired.insert(id);
            }
        } else {
            self.nodes.remove(id);
        }
    }

    /// Live nodes with their ids.
    fn live(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .filter(|(id, _)| !self.retired.contains(id))
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.retired.len()
    }

    /// Is the tree empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live node id.
    pub fn ids(&self) -> Vec<NodeId> {
        self.live().map(|(id, _)| id).collect()
    }

    /// Is the node alive?
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// A node, if alive.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        if self.retired.contains(&id) {
            return None;
        }
        self.nodes.get(id)
    }

    /// A mutable node, if alive.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.retired.contains(&id) {
            return None;
        }
        self.nodes.get_mut(id)
    }

    /// A node, failing if it is gone.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.get(id).ok_or(Error::NodeNotFound)
    }

    /// A mutable node, failing if it is gone.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.get_mut(id).ok_or(Error::NodeNotFound)
    }

    /// Find a node by display id.
    pub fn find_by_node_id(&self, node_id: &str) -> Option<NodeId> {
        self.live()
            .find(|(_, n)| n.node_id == node_id)
            .map(|(id, _)| id)
    }

    /// Are effects enabled?
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Enable or disable effects.
    pub(crate) fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }

    /// Parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Ancestors of a node, nearest first, excluding the node.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut current = self.parent(id);
        while let Some(p) = current {
            out.push(p);
            current = self.parent(p);
        }
        out
    }

    /// The node itself if it instantiates `plugin`, otherwise its nearest
    /// ancestor that does.
    pub fn ancestor_of_type(&self, id: NodeId, plugin: &str) -> Option<NodeId> {
        iter::once(id)
            .chain(self.ancestors(id))
            .find(|n| self.get(*n).is_some_and(|n| n.plugin == plugin))
    }

    /// Children referenced from a node's fields.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id).map(Node::child_ids).unwrap_or_default()
    }

    /// The node and all its descendants, children before parents.
    pub fn subtree_post_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        self.post_order(id, &mut out);
        out
    }

    /// Post-order walk helper.
    fn post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for child in self.children(id) {
            if self.parent(child) == Some(id) {
                self.post_order(child, out);
            }
        }
        out.push(id);
    }

    /// Slash-separated field path from the root to a node, e.g.
    /// `/content/items/0`. The root's path is empty.
    pub fn path(&self, id: NodeId) -> String {
        let mut segments = vec![];
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if let Some(segment) = self
                .get(parent)
                .and_then(|p| field_path_to(&p.fields, current))
            {
                segments.push(segment);
            }
            current = parent;
        }
        segments.reverse();
        segments.into_iter().map(|s| format!("/{s}")).collect()
    }

    /// Assign a declared field, maintaining parent links. Node references in
    /// the new value are adopted; nodes referenced only by the old value are
    /// detached. A node can not adopt itself or one of its ancestors.
    pub fn set(&mut self, id: NodeId, field: &str, value: Value) -> Result<()> {
        let mut adopted = vec![];
        collect_nodes(&value, &mut adopted);
        let ancestors = self.ancestors(id);
        for child in &adopted {
            let c = self.node(*child)?;
            if c.parent.is_some_and(|p| p != id) {
                return Err(Error::InvalidProps {
                    plugin: c.plugin.clone(),
                    message: format!("node {} already has a parent", c.node_id),
                });
            }
            if *child == id || ancestors.contains(child) {
                return Err(Error::InvalidProps {
                    plugin: c.plugin.clone(),
                    message: format!("node {} can not contain itself", c.node_id),
                });
            }
        }
        let old = self.node_mut(id)?.set(field, value)?;
        let mut released = vec![];
        collect_nodes(&old, &mut released);
        for child in released {
            if !adopted.contains(&child) {
                if let Some(c) = self.get_mut(child) {
                    c.parent = None;
                }
            }
        }
        for child in adopted {
            if let Some(c) = self.get_mut(child) {
                c.parent = Some(id);
            }
        }
        Ok(())
    }

    /// Remove every reference to `child` from a node's fields.
    pub(crate) fn unlink(&mut self, parent: NodeId, child: NodeId) {
        if let Some(p) = self.get_mut(parent) {
            for value in p.fields.values_mut() {
                unlink_value(value, child);
            }
        }
        if let Some(c) = self.get_mut(child) {
            c.parent = None;
        }
    }

    /// Snapshot a node: base state, declared fields and child snapshots.
    pub fn snapshot(&self, id: NodeId) -> Result<Value> {
        let node = self.node(id)?;
        let mut map = node.base_snapshot();
        for (name, value) in &node.fields {
            map.insert(name.clone(), self.resolve_nodes(value)?);
        }
        Ok(Value::Map(map))
    }

    /// Replace node references with snapshots.
    fn resolve_nodes(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Node(child) => self.snapshot(*child)?,
            Value::Array(values) => Value::Array(
                values
                    .iter()
                    .map(|v| self.resolve_nodes(v))
                    .collect::<Result<_>>()?,
            ),
            Value::Map(values) => Value::Map(
                values
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.resolve_nodes(v)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Copy every live node's persisted state and open a capture.
    pub(crate) fn capture(&mut self) -> TreeCapture {
        self.holds += 1;
        TreeCapture {
            states: self.live().map(|(id, n)| (id, n.capture())).collect(),
            root: None,
        }
    }

    /// Close a capture without restoring it.
    pub(crate) fn commit(&mut self, capture: TreeCapture) {
        drop(capture);
        self.release();
    }

    /// Close a capture and restore its state. Nodes removed since the
    /// capture are revived; nodes created since are reported so the caller
    /// can destroy them.
    pub(crate) fn restore(&mut self, capture: TreeCapture) -> Restored {
        let mut states = capture.states;
        let mut restored = Restored::default();
        for (id, node) in self.nodes.iter_mut() {
            let retired = self.retired.contains(&id);
            match states.remove(&id) {
                Some(state) => {
                    node.restore(state);
                    if retired {
                        restored.revived.push(id);
                    }
                }
                None if !retired => restored.created.push(id),
                None => {}
            }
        }
        for id in &restored.revived {
            self.retired.remove(id);
        }
        self.release();
        restored
    }

    /// Close one capture, dropping retired nodes once none is open.
    fn release(&mut self) {
        self.holds = self.holds.saturating_sub(1);
        if self.holds == 0 {
            for id in self.retired.drain() {
                self.nodes.remove(id);
            }
        }
    }
}

/// Path segment locating `child` within a node's fields.
fn field_path_to(fields: &BTreeMap<String, Value>, child: NodeId) -> Option<String> {
    fields.iter().find_map(|(name, value)| match value {
        Value::Node(id) if *id == child => Some(name.clone()),
        Value::Array(values) => values
            .iter()
            .position(|v| v.as_node() == Some(child))
            .map(|idx| format!("{name}/{idx}")),
        _ => None,
    })
}

/// Remove references to `child` from a value.
fn unlink_value(value: &mut Value, child: NodeId) {
    match value {
        Value::Node(id) if *id == child => *value = Value::Null,
        Value::Array(values) => {
            values.retain(|v| v.as_node() != Some(child));
            values.iter_mut().for_each(|v| unlink_value(v, child));
        }
        Value::Map(values) => values.values_mut().for_each(|v| unlink_value(v, child)),
        _ => {}
    }
}
