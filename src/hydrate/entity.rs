//! Shared proxies for graph entities.
//!
//! A proxy is created either locally (unbound, no server identity yet) or by
//! the hydrator (bound). Cloning a proxy clones the handle, not the entity,
//! so equality is handle identity.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use super::value::Value;

#[derive(Debug, Default)]
struct NodeState {
    identity: Option<i64>,
    element_id: Option<String>,
    labels: BTreeSet<String>,
    properties: HashMap<String, Value>,
    /// Labels last read from the server, used to compute label pushes.
    remote_labels: BTreeSet<String>,
    stale: bool,
}

/// A node proxy.
#[derive(Clone)]
pub struct Node(Arc<Mutex<NodeState>>);

impl Node {
    /// Creates an unbound node.
    pub fn new<L, S>(labels: L, properties: HashMap<String, Value>) -> Self
    where
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Arc::new(Mutex::new(NodeState {
            labels: labels.into_iter().map(Into::into).collect(),
            properties,
            ..NodeState::default()
        })))
    }

    /// A bound node whose labels and properties have not been loaded.
    pub(crate) fn placeholder(identity: i64, element_id: Option<String>) -> Self {
        Self(Arc::new(Mutex::new(NodeState {
            identity: Some(identity),
            element_id,
            stale: true,
            ..NodeState::default()
        })))
    }

    pub fn identity(&self) -> Option<i64> {
        self.0.lock().identity
    }

    pub fn element_id(&self) -> Option<String> {
        self.0.lock().element_id.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.identity().is_some()
    }

    /// True while labels and properties are unknown or known to be outdated.
    pub fn is_stale(&self) -> bool {
        self.0.lock().stale
    }

    /// Labels in sorted order.
    pub fn labels(&self) -> Vec<String> {
        self.0.lock().labels.iter().cloned().collect()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.0.lock().labels.contains(label)
    }

    pub fn add_label(&self, label: impl Into<String>) {
        self.0.lock().labels.insert(label.into());
    }

    pub fn remove_label(&self, label: &str) {
        self.0.lock().labels.remove(label);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.lock().properties.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.lock().properties.insert(key.into(), value.into());
    }

    pub fn properties(&self) -> HashMap<String, Value> {
        self.0.lock().properties.clone()
    }

    /// Returns true if both handles refer to the same proxy.
    pub fn same(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn bind(&self, identity: i64, element_id: Option<String>) {
        let mut state = self.0.lock();
        state.identity = Some(identity);
        if element_id.is_some() {
            state.element_id = element_id;
        }
    }

    pub(crate) fn unbind(&self) {
        let mut state = self.0.lock();
        state.identity = None;
        state.element_id = None;
        state.remote_labels.clear();
    }

    /// Replaces labels and properties with the server's view.
    pub(crate) fn refresh(&self, labels: BTreeSet<String>, properties: HashMap<String, Value>) {
        let mut state = self.0.lock();
        state.remote_labels = labels.clone();
        state.labels = labels;
        state.properties = properties;
        state.stale = false;
    }

    pub(crate) fn set_remote_labels(&self, labels: BTreeSet<String>) {
        self.0.lock().remote_labels = labels;
    }

    pub(crate) fn remote_labels(&self) -> BTreeSet<String> {
        self.0.lock().remote_labels.clone()
    }

    pub(crate) fn mark_stale(&self) {
        self.0.lock().stale = true;
    }

    pub(crate) fn downgrade(&self) -> WeakNode {
        WeakNode(Arc::downgrade(&self.0))
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.lock();
        f.debug_struct("Node")
            .field("identity", &state.identity)
            .field("labels", &state.labels)
            .field("properties", &state.properties)
            .finish()
    }
}

/// Cache-side handle that does not keep a node alive.
#[derive(Clone)]
pub(crate) struct WeakNode(std::sync::Weak<Mutex<NodeState>>);

impl WeakNode {
    pub(crate) fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(Node)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[derive(Debug)]
struct RelState {
    identity: Option<i64>,
    element_id: Option<String>,
    rel_type: String,
    properties: HashMap<String, Value>,
    stale: bool,
}

struct RelInner {
    start: Node,
    end: Node,
    state: Mutex<RelState>,
}

/// A relationship proxy. Its endpoints are node proxies from the same cache.
#[derive(Clone)]
pub struct Relationship(Arc<RelInner>);

impl Relationship {
    /// Creates an unbound relationship between two nodes.
    pub fn new(
        start: &Node,
        rel_type: impl Into<String>,
        end: &Node,
        properties: HashMap<String, Value>,
    ) -> Self {
        Self::build(start, end, None, None, rel_type.into(), properties, false)
    }

    pub(crate) fn bound(
        start: &Node,
        end: &Node,
        identity: i64,
        element_id: Option<String>,
        rel_type: String,
        properties: HashMap<String, Value>,
        stale: bool,
    ) -> Self {
        Self::build(start, end, Some(identity), element_id, rel_type, properties, stale)
    }

    fn build(
        start: &Node,
        end: &Node,
        identity: Option<i64>,
        element_id: Option<String>,
        rel_type: String,
        properties: HashMap<String, Value>,
        stale: bool,
    ) -> Self {
        Self(Arc::new(RelInner {
            start: start.clone(),
            end: end.clone(),
            state: Mutex::new(RelState {
                identity,
                element_id,
                rel_type,
                properties,
                stale,
            }),
        }))
    }

    pub fn start_node(&self) -> &Node {
        &self.0.start
    }

    pub fn end_node(&self) -> &Node {
        &self.0.end
    }

    pub fn identity(&self) -> Option<i64> {
        self.0.state.lock().identity
    }

    pub fn element_id(&self) -> Option<String> {
        self.0.state.lock().element_id.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.identity().is_some()
    }

    pub fn is_stale(&self) -> bool {
        self.0.state.lock().stale
    }

    pub fn rel_type(&self) -> String {
        self.0.state.lock().rel_type.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.state.lock().properties.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.state.lock().properties.insert(key.into(), value.into());
    }

    pub fn properties(&self) -> HashMap<String, Value> {
        self.0.state.lock().properties.clone()
    }

    pub fn same(&self, other: &Relationship) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn bind(&self, identity: i64, element_id: Option<String>) {
        let mut state = self.0.state.lock();
        state.identity = Some(identity);
        if element_id.is_some() {
            state.element_id = element_id;
        }
    }

    pub(crate) fn unbind(&self) {
        let mut state = self.0.state.lock();
        state.identity = None;
        state.element_id = None;
    }

    pub(crate) fn refresh(&self, rel_type: String, properties: HashMap<String, Value>) {
        let mut state = self.0.state.lock();
        state.rel_type = rel_type;
        state.properties = properties;
        state.stale = false;
    }

    pub(crate) fn mark_stale(&self) {
        self.0.state.lock().stale = true;
    }

    pub(crate) fn downgrade(&self) -> WeakRelationship {
        WeakRelationship(Arc::downgrade(&self.0))
    }
}

impl PartialEq for Relationship {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Relationship {}

impl Hash for Relationship {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("Relationship")
            .field("identity", &state.identity)
            .field("start", &self.0.start.identity())
            .field("type", &state.rel_type)
            .field("end", &self.0.end.identity())
            .field("properties", &state.properties)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakRelationship(std::sync::Weak<RelInner>);

impl WeakRelationship {
    pub(crate) fn upgrade(&self) -> Option<Relationship> {
        self.0.upgrade().map(Relationship)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// An alternating walk of nodes and relationships, `nodes.len() ==
/// relationships.len() + 1`. Relationships keep their own direction, which
/// may point against the walk.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
}

impl Path {
    pub(crate) fn from_parts(nodes: Vec<Node>, relationships: Vec<Relationship>) -> Self {
        debug_assert_eq!(nodes.len(), relationships.len() + 1);
        Self {
            nodes,
            relationships,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn start_node(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn end_node(&self) -> &Node {
        &self.nodes[self.nodes.len() - 1]
    }

    /// Number of relationships traversed.
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }
}

/// An unordered set of nodes and relationships. Relationship endpoints are
/// always members.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subgraph {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
}

impl Subgraph {
    pub fn new(nodes: impl IntoIterator<Item = Node>, relationships: impl IntoIterator<Item = Relationship>) -> Self {
        let mut graph = Self::default();
        for node in nodes {
            graph.add_node(node);
        }
        for rel in relationships {
            graph.add_relationship(rel);
        }
        graph
    }

    pub fn add_node(&mut self, node: Node) {
        if !self.nodes.iter().any(|n| n.same(&node)) {
            self.nodes.push(node);
        }
    }

    pub fn add_relationship(&mut self, rel: Relationship) {
        if self.relationships.iter().any(|r| r.same(&rel)) {
            return;
        }
        self.add_node(rel.start_node().clone());
        self.add_node(rel.end_node().clone());
        self.relationships.push(rel);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl From<Node> for Subgraph {
    fn from(node: Node) -> Self {
        Self::new([node], [])
    }
}

impl From<Relationship> for Subgraph {
    fn from(rel: Relationship) -> Self {
        Self::new([], [rel])
    }
}

impl From<&Path> for Subgraph {
    fn from(path: &Path) -> Self {
        Self::new(path.nodes.iter().cloned(), path.relationships.iter().cloned())
    }
}
