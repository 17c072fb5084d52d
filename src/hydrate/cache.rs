//! Per-session identity cache for entity proxies.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::entity::{Node, Relationship, WeakNode, WeakRelationship};

/// Dead entries are swept when a map grows past this many slots.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Default)]
struct Maps {
    nodes: HashMap<i64, WeakNode>,
    relationships: HashMap<i64, WeakRelationship>,
    sweep_at: usize,
}

impl Maps {
    fn sweep(&mut self) {
        let len = self.nodes.len() + self.relationships.len();
        if len < self.sweep_at.max(SWEEP_THRESHOLD) {
            return;
        }
        self.nodes.retain(|_, n| n.is_live());
        self.relationships.retain(|_, r| r.is_live());
        self.sweep_at = 2 * (self.nodes.len() + self.relationships.len());
    }
}

/// Maps server identities to the proxies handed out for them.
///
/// The cache only holds weak references: a proxy lives as long as
/// application code holds it, and while it lives every later appearance of
/// the same identity resolves to it. Clones share the same maps; each
/// `Session` owns its own.
#[derive(Clone, Default)]
pub struct EntityCache(Arc<Mutex<Maps>>);

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, identity: i64) -> Option<Node> {
        self.0.lock().nodes.get(&identity).and_then(WeakNode::upgrade)
    }

    pub fn relationship(&self, identity: i64) -> Option<Relationship> {
        self.0
            .lock()
            .relationships
            .get(&identity)
            .and_then(WeakRelationship::upgrade)
    }

    /// Registers a bound node. Unbound nodes are ignored.
    pub fn insert_node(&self, node: &Node) {
        if let Some(id) = node.identity() {
            let mut maps = self.0.lock();
            maps.nodes.insert(id, node.downgrade());
            maps.sweep();
        }
    }

    pub fn insert_relationship(&self, rel: &Relationship) {
        if let Some(id) = rel.identity() {
            let mut maps = self.0.lock();
            maps.relationships.insert(id, rel.downgrade());
            maps.sweep();
        }
    }

    pub fn evict_node(&self, identity: i64) {
        self.0.lock().nodes.remove(&identity);
    }

    pub fn evict_relationship(&self, identity: i64) {
        self.0.lock().relationships.remove(&identity);
    }

    /// Forgets every identity. Proxies already handed out keep their state
    /// but later hydrations create fresh ones.
    pub fn clear(&self) {
        let mut maps = self.0.lock();
        maps.nodes.clear();
        maps.relationships.clear();
        maps.sweep_at = 0;
    }

    /// Number of live cached entities.
    pub fn len(&self) -> usize {
        let maps = self.0.lock();
        maps.nodes.values().filter(|n| n.is_live()).count()
            + maps.relationships.values().filter(|r| r.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache").field("live", &self.len()).finish()
    }
}
