//! Conversion of wire values into [`Value`]s.

use std::collections::{BTreeSet, HashMap};

use super::cache::EntityCache;
use super::entity::{Node, Path, Relationship};
use super::value::Value;
use crate::error::GraphError;
use crate::types::{BoltDict, BoltNode, BoltPath, BoltRelationship, BoltUnboundRelationship, BoltValue};

/// Local proxies pre-bound to result columns, keyed by column name.
///
/// When a bound column hydrates to an entity, the local proxy takes the
/// server identity instead of a new proxy being created.
pub type Bindings = HashMap<String, Value>;

/// Hydrates wire values against one session's [`EntityCache`].
pub struct Hydrator<'a> {
    cache: &'a EntityCache,
    bindings: Option<&'a Bindings>,
    lenient: bool,
}

impl<'a> Hydrator<'a> {
    pub fn new(cache: &'a EntityCache) -> Self {
        Self {
            cache,
            bindings: None,
            lenient: false,
        }
    }

    pub fn with_bindings(mut self, bindings: &'a Bindings) -> Self {
        self.bindings = Some(bindings);
        self
    }

    /// Substitute `Null` for unsupported values instead of failing.
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Hydrates one row. Any failing cell fails the whole row, and only the row.
    pub fn hydrate_row(&self, keys: &[String], row: Vec<BoltValue>) -> Result<Vec<Value>, GraphError> {
        row.iter()
            .enumerate()
            .map(|(i, raw)| {
                let bound = keys
                    .get(i)
                    .and_then(|k| self.bindings.and_then(|b| b.get(k)));
                self.hydrate_cell(raw, bound)
            })
            .collect()
    }

    pub fn hydrate(&self, raw: &BoltValue) -> Result<Value, GraphError> {
        self.hydrate_cell(raw, None)
    }

    fn hydrate_cell(&self, raw: &BoltValue, bound: Option<&Value>) -> Result<Value, GraphError> {
        Ok(match raw {
            BoltValue::Null => Value::Null,
            BoltValue::Boolean(b) => Value::Boolean(*b),
            BoltValue::Integer(i) => Value::Integer(*i),
            BoltValue::Float(f) => Value::Float(*f),
            BoltValue::String(s) => Value::String(s.clone()),
            BoltValue::Bytes(b) => Value::Bytes(b.clone()),
            BoltValue::List(items) => Value::List(
                items
                    .iter()
                    .map(|v| self.hydrate(v))
                    .collect::<Result<_, _>>()?,
            ),
            BoltValue::Dict(d) => Value::Map(self.hydrate_dict(d)?),
            BoltValue::Node(n) => Value::Node(self.node(n, bound.and_then(Value::as_node))?),
            BoltValue::Relationship(r) => {
                Value::Relationship(self.relationship(r, bound.and_then(Value::as_relationship))?)
            }
            BoltValue::Path(p) => Value::Path(self.path(p)?),
            BoltValue::Date(v) => Value::Date(v.clone()),
            BoltValue::Time(v) => Value::Time(v.clone()),
            BoltValue::LocalTime(v) => Value::LocalTime(v.clone()),
            BoltValue::DateTime(v) => Value::DateTime(v.clone()),
            BoltValue::DateTimeZoneId(v) => Value::DateTimeZoneId(v.clone()),
            BoltValue::LocalDateTime(v) => Value::LocalDateTime(v.clone()),
            BoltValue::Duration(v) => Value::Duration(v.clone()),
            BoltValue::Point2D(v) => Value::Point2D(v.clone()),
            BoltValue::Point3D(v) => Value::Point3D(v.clone()),
            BoltValue::UnboundRelationship(_) => {
                return self.unsupported("unbound relationship outside a path".into());
            }
            BoltValue::Structure { tag, fields } => {
                return self.unsupported(format!(
                    "structure 0x{tag:02X} with {} fields",
                    fields.len()
                ));
            }
        })
    }

    fn unsupported(&self, what: String) -> Result<Value, GraphError> {
        if self.lenient {
            tracing::warn!(value = %what, "substituting null for unsupported value");
            Ok(Value::Null)
        } else {
            Err(GraphError::UnsupportedValueType(what))
        }
    }

    pub(crate) fn hydrate_dict(&self, dict: &BoltDict) -> Result<HashMap<String, Value>, GraphError> {
        dict.iter()
            .map(|(k, v)| Ok((k.clone(), self.hydrate(v)?)))
            .collect()
    }

    fn element_id(raw: &str) -> Option<String> {
        (!raw.is_empty()).then(|| raw.to_string())
    }

    fn node(&self, raw: &BoltNode, bound: Option<&Node>) -> Result<Node, GraphError> {
        let properties = self.hydrate_dict(&raw.properties)?;
        let labels = raw.labels.iter().cloned().collect();
        Ok(self.node_parts(raw.id, Self::element_id(&raw.element_id), labels, properties, bound))
    }

    /// Resolves a fully described node: the bound proxy, the cached one, or a
    /// new one, refreshed in place with the incoming labels and properties.
    pub(crate) fn node_parts(
        &self,
        identity: i64,
        element_id: Option<String>,
        labels: BTreeSet<String>,
        properties: HashMap<String, Value>,
        bound: Option<&Node>,
    ) -> Node {
        let node = match bound.cloned().or_else(|| self.cache.node(identity)) {
            Some(node) => {
                node.bind(identity, element_id);
                node
            }
            None => Node::placeholder(identity, element_id),
        };
        node.refresh(labels, properties);
        self.cache.insert_node(&node);
        node
    }

    /// Resolves a node known only by identity. Unseen nodes become stale
    /// placeholders; cached ones are returned untouched.
    pub(crate) fn node_ref(&self, identity: i64, element_id: Option<String>) -> Node {
        if let Some(node) = self.cache.node(identity) {
            return node;
        }
        let node = Node::placeholder(identity, element_id);
        self.cache.insert_node(&node);
        node
    }

    fn relationship(
        &self,
        raw: &BoltRelationship,
        bound: Option<&Relationship>,
    ) -> Result<Relationship, GraphError> {
        let properties = self.hydrate_dict(&raw.properties)?;
        let start = self.node_ref(raw.start_node_id, Self::element_id(&raw.start_element_id));
        let end = self.node_ref(raw.end_node_id, Self::element_id(&raw.end_element_id));
        Ok(self.relationship_parts(
            raw.id,
            Self::element_id(&raw.element_id),
            &start,
            &end,
            raw.rel_type.clone(),
            properties,
            bound,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn relationship_parts(
        &self,
        identity: i64,
        element_id: Option<String>,
        start: &Node,
        end: &Node,
        rel_type: String,
        properties: HashMap<String, Value>,
        bound: Option<&Relationship>,
    ) -> Relationship {
        let existing = bound.cloned().or_else(|| self.cache.relationship(identity));
        let rel = match existing {
            Some(rel) => {
                rel.bind(identity, element_id);
                rel.refresh(rel_type, properties);
                rel
            }
            None => Relationship::bound(start, end, identity, element_id, rel_type, properties, false),
        };
        self.cache.insert_relationship(&rel);
        rel
    }

    /// Resolves a relationship known only by identity and endpoints.
    pub(crate) fn relationship_ref(&self, identity: i64, start: &Node, end: &Node) -> Relationship {
        if let Some(rel) = self.cache.relationship(identity) {
            return rel;
        }
        let rel = Relationship::bound(start, end, identity, None, String::new(), HashMap::new(), true);
        self.cache.insert_relationship(&rel);
        rel
    }

    fn unbound(
        &self,
        raw: &BoltUnboundRelationship,
        start: &Node,
        end: &Node,
    ) -> Result<Relationship, GraphError> {
        let properties = self.hydrate_dict(&raw.properties)?;
        Ok(self.relationship_parts(
            raw.id,
            Self::element_id(&raw.element_id),
            start,
            end,
            raw.rel_type.clone(),
            properties,
            None,
        ))
    }

    /// Rebuilds a path from its distinct nodes, distinct relationships and
    /// the `(relationship, node)` index pairs describing the walk.
    fn path(&self, raw: &BoltPath) -> Result<Path, GraphError> {
        validate_path(raw)?;
        let distinct = raw
            .nodes
            .iter()
            .map(|n| self.node(n, None))
            .collect::<Result<Vec<_>, _>>()?;

        let mut nodes = Vec::with_capacity(raw.indices.len() / 2 + 1);
        let mut relationships = Vec::with_capacity(raw.indices.len() / 2);
        let mut last = distinct[0].clone();
        nodes.push(last.clone());
        for pair in raw.indices.chunks_exact(2) {
            let (rel_index, node_index) = (pair[0], pair[1]);
            let next = distinct[node_index as usize].clone();
            let unbound = &raw.rels[rel_index.unsigned_abs() as usize - 1];
            let rel = if rel_index > 0 {
                self.unbound(unbound, &last, &next)?
            } else {
                self.unbound(unbound, &next, &last)?
            };
            relationships.push(rel);
            nodes.push(next.clone());
            last = next;
        }
        Ok(Path::from_parts(nodes, relationships))
    }
}

fn validate_path(raw: &BoltPath) -> Result<(), GraphError> {
    if raw.nodes.is_empty() {
        return Err(GraphError::MalformedPath("path has no nodes".into()));
    }
    if raw.indices.len() % 2 != 0 {
        return Err(GraphError::MalformedPath(format!(
            "odd index sequence length {}",
            raw.indices.len()
        )));
    }
    for pair in raw.indices.chunks_exact(2) {
        let (rel_index, node_index) = (pair[0], pair[1]);
        if rel_index == 0 || rel_index.unsigned_abs() as usize > raw.rels.len() {
            return Err(GraphError::MalformedPath(format!(
                "relationship index {rel_index} out of range for {} relationships",
                raw.rels.len()
            )));
        }
        if node_index < 0 || node_index as usize >= raw.nodes.len() {
            return Err(GraphError::MalformedPath(format!(
                "node index {node_index} out of range for {} nodes",
                raw.nodes.len()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bolt_node(id: i64, label: &str, name: &str) -> BoltNode {
        BoltNode {
            id,
            labels: vec![label.to_string()],
            properties: BoltDict::from([("name".to_string(), BoltValue::from(name))]),
            element_id: format!("4:db:{id}"),
        }
    }

    fn knows(id: i64) -> BoltUnboundRelationship {
        BoltUnboundRelationship {
            id,
            rel_type: "KNOWS".to_string(),
            properties: BoltDict::new(),
            element_id: String::new(),
        }
    }

    #[test]
    fn repeated_nodes_share_one_proxy() {
        let cache = EntityCache::new();
        let hydrator = Hydrator::new(&cache);
        let first = hydrator.hydrate(&BoltValue::Node(bolt_node(1, "Person", "Alice"))).unwrap();
        let second = hydrator.hydrate(&BoltValue::Node(bolt_node(1, "Person", "Alicia"))).unwrap();
        assert_eq!(first, second);
        let node = first.as_node().unwrap();
        assert_eq!(node.get("name"), Some(Value::from("Alicia")));
        assert_eq!(node.element_id().as_deref(), Some("4:db:1"));
    }

    #[test]
    fn relationship_endpoints_come_from_the_cache() {
        let cache = EntityCache::new();
        let hydrator = Hydrator::new(&cache);
        let alice = hydrator.hydrate(&BoltValue::Node(bolt_node(1, "Person", "Alice"))).unwrap();
        let rel = hydrator
            .hydrate(&BoltValue::Relationship(BoltRelationship {
                id: 10,
                start_node_id: 1,
                end_node_id: 2,
                rel_type: "KNOWS".into(),
                properties: BoltDict::new(),
                element_id: String::new(),
                start_element_id: String::new(),
                end_element_id: String::new(),
            }))
            .unwrap();
        let rel = rel.as_relationship().unwrap();
        assert!(rel.start_node().same(alice.as_node().unwrap()));
        assert!(rel.end_node().is_stale());
        assert_eq!(rel.end_node().identity(), Some(2));
    }

    #[test]
    fn path_follows_relationship_direction() {
        let cache = EntityCache::new();
        let hydrator = Hydrator::new(&cache);
        // (a)-[:KNOWS]->(b)<-[:KNOWS]-(c)
        let raw = BoltPath {
            nodes: vec![bolt_node(1, "P", "a"), bolt_node(2, "P", "b"), bolt_node(3, "P", "c")],
            rels: vec![knows(10), knows(11)],
            indices: vec![1, 1, -2, 2],
        };
        let value = hydrator.hydrate(&BoltValue::Path(raw)).unwrap();
        let path = value.as_path().unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.nodes().len(), 3);
        let second = &path.relationships()[1];
        assert_eq!(second.start_node().identity(), Some(3));
        assert_eq!(second.end_node().identity(), Some(2));
        assert_eq!(path.end_node().identity(), Some(3));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        let cache = EntityCache::new();
        let hydrator = Hydrator::new(&cache);
        let cases = [
            (vec![bolt_node(1, "P", "a")], vec![knows(10)], vec![1]),
            (vec![bolt_node(1, "P", "a")], vec![knows(10)], vec![0, 0]),
            (vec![bolt_node(1, "P", "a")], vec![knows(10)], vec![2, 0]),
            (vec![bolt_node(1, "P", "a")], vec![knows(10)], vec![1, 5]),
            (vec![], vec![], vec![]),
        ];
        for (nodes, rels, indices) in cases {
            let raw = BoltValue::Path(BoltPath { nodes, rels, indices });
            let err = hydrator.hydrate(&raw).unwrap_err();
            assert!(matches!(err, GraphError::MalformedPath(_)), "{err:?}");
        }
    }

    #[test]
    fn unknown_structures_fail_only_their_value() {
        let cache = EntityCache::new();
        let raw = BoltValue::Structure {
            tag: 0x7A,
            fields: vec![],
        };
        let keys = vec!["a".to_string(), "b".to_string()];

        let strict = Hydrator::new(&cache);
        let err = strict
            .hydrate_row(&keys, vec![BoltValue::Integer(1), raw.clone()])
            .unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedValueType(_)));

        let lenient = Hydrator::new(&cache).lenient(true);
        let row = lenient.hydrate_row(&keys, vec![BoltValue::Integer(1), raw]).unwrap();
        assert_eq!(row, vec![Value::Integer(1), Value::Null]);
    }

    #[test]
    fn bindings_give_local_proxies_their_identity() {
        let cache = EntityCache::new();
        let local = Node::new(["Person"], HashMap::new());
        let bindings = Bindings::from([("a".to_string(), Value::Node(local.clone()))]);
        let hydrator = Hydrator::new(&cache).with_bindings(&bindings);
        let row = hydrator
            .hydrate_row(&["a".to_string()], vec![BoltValue::Node(bolt_node(42, "Person", "Bob"))])
            .unwrap();
        assert!(row[0].as_node().unwrap().same(&local));
        assert_eq!(local.identity(), Some(42));
        assert!(cache.node(42).unwrap().same(&local));
    }
}
