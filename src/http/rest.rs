//! JSON bodies of the transactional HTTP endpoint and hydration of its
//! `rest` result format.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::GraphError;
use crate::hydrate::{Hydrator, Node, Path, Relationship, Value};
use crate::types::{BoltDict, BoltValue};

#[derive(Debug, Serialize)]
pub(crate) struct StatementBatch<'a> {
    pub(crate) statements: &'a [Statement],
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Statement {
    pub(crate) statement: String,
    pub(crate) parameters: serde_json::Map<String, Json>,
    #[serde(rename = "resultDataContents")]
    pub(crate) result_data_contents: [&'static str; 1],
    #[serde(rename = "includeStats")]
    pub(crate) include_stats: bool,
}

impl Statement {
    pub(crate) fn new(statement: String, parameters: serde_json::Map<String, Json>) -> Self {
        Self {
            statement,
            parameters,
            result_data_contents: ["rest"],
            include_stats: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TxResponse {
    #[serde(default)]
    pub(crate) results: Vec<StatementResult>,
    #[serde(default)]
    pub(crate) errors: Vec<ServerError>,
    pub(crate) commit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatementResult {
    #[serde(default)]
    pub(crate) columns: Vec<String>,
    #[serde(default)]
    pub(crate) data: Vec<DataRow>,
    pub(crate) stats: Option<serde_json::Map<String, Json>>,
    pub(crate) plan: Option<Json>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DataRow {
    #[serde(default)]
    pub(crate) rest: Vec<Json>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerError {
    pub(crate) code: String,
    #[serde(default)]
    pub(crate) message: String,
}

impl From<&ServerError> for GraphError {
    fn from(e: &ServerError) -> Self {
        GraphError::from_code(&e.code, &e.message)
    }
}

/// Summary metadata in the shape Bolt footers use.
pub(crate) fn footer(result: &StatementResult) -> BoltDict {
    let mut footer = BoltDict::new();
    if let Some(stats) = &result.stats {
        let stats = stats.iter().map(|(k, v)| (k.clone(), to_bolt(v))).collect();
        footer.insert("stats".to_string(), BoltValue::Dict(stats));
    }
    if let Some(plan) = &result.plan {
        footer.insert("plan".to_string(), to_bolt(plan));
    }
    footer
}

fn to_bolt(json: &Json) -> BoltValue {
    match json {
        Json::Null => BoltValue::Null,
        Json::Bool(b) => BoltValue::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => BoltValue::Integer(i),
            None => BoltValue::Float(n.as_f64().unwrap_or_default()),
        },
        Json::String(s) => BoltValue::String(s.clone()),
        Json::Array(items) => BoltValue::List(items.iter().map(to_bolt).collect()),
        Json::Object(map) => BoltValue::Dict(map.iter().map(|(k, v)| (k.clone(), to_bolt(v))).collect()),
    }
}

/// Identity at the end of an entity URI such as `.../db/data/node/42`.
fn identity(uri: &str) -> Result<i64, GraphError> {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| GraphError::Protocol(format!("no entity identity in {uri:?}")))
}

fn uri_field<'a>(object: &'a serde_json::Map<String, Json>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Json::as_str)
}

/// Converts `rest` formatted cells into values, resolving entities through
/// the hydrator's cache.
pub(crate) struct RestHydrator<'a> {
    hydrator: Hydrator<'a>,
}

impl<'a> RestHydrator<'a> {
    pub(crate) fn new(hydrator: Hydrator<'a>) -> Self {
        Self { hydrator }
    }

    pub(crate) fn row(&self, keys: &[String], cells: &[Json], bindings: &HashMap<String, Value>) -> Result<Vec<Value>, GraphError> {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let bound = keys.get(i).and_then(|k| bindings.get(k));
                self.cell(cell, bound)
            })
            .collect()
    }

    fn cell(&self, json: &Json, bound: Option<&Value>) -> Result<Value, GraphError> {
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.cell(item, None))
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(object) => {
                if object.contains_key("self") && object.contains_key("type") && object.contains_key("start") {
                    Value::Relationship(self.relationship(object, bound.and_then(Value::as_relationship))?)
                } else if object.contains_key("self") && object.contains_key("data") {
                    Value::Node(self.node(object, bound.and_then(Value::as_node))?)
                } else if object.contains_key("nodes") && object.contains_key("relationships") {
                    Value::Path(self.path(object)?)
                } else {
                    Value::Map(
                        object
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), self.cell(v, None)?)))
                            .collect::<Result<_, GraphError>>()?,
                    )
                }
            }
        })
    }

    fn data(&self, object: &serde_json::Map<String, Json>) -> Result<HashMap<String, Value>, GraphError> {
        match object.get("data") {
            Some(Json::Object(data)) => data
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.cell(v, None)?)))
                .collect(),
            _ => Ok(HashMap::new()),
        }
    }

    fn entity_identity(object: &serde_json::Map<String, Json>) -> Result<i64, GraphError> {
        if let Some(id) = object
            .get("metadata")
            .and_then(|m| m.get("id"))
            .and_then(Json::as_i64)
        {
            return Ok(id);
        }
        identity(uri_field(object, "self").unwrap_or_default())
    }

    fn node(&self, object: &serde_json::Map<String, Json>, bound: Option<&Node>) -> Result<Node, GraphError> {
        let id = Self::entity_identity(object)?;
        let labels: BTreeSet<String> = object
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(Json::as_array)
            .map(|labels| labels.iter().filter_map(|l| l.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let properties = self.data(object)?;
        Ok(self.hydrator.node_parts(id, None, labels, properties, bound))
    }

    fn relationship(
        &self,
        object: &serde_json::Map<String, Json>,
        bound: Option<&Relationship>,
    ) -> Result<Relationship, GraphError> {
        let id = Self::entity_identity(object)?;
        let start = self.hydrator.node_ref(identity(uri_field(object, "start").unwrap_or_default())?, None);
        let end = self.hydrator.node_ref(identity(uri_field(object, "end").unwrap_or_default())?, None);
        let rel_type = uri_field(object, "type").unwrap_or_default().to_string();
        let properties = self.data(object)?;
        Ok(self
            .hydrator
            .relationship_parts(id, None, &start, &end, rel_type, properties, bound))
    }

    fn path(&self, object: &serde_json::Map<String, Json>) -> Result<Path, GraphError> {
        let uris = |key: &str| -> Vec<&str> {
            object
                .get(key)
                .and_then(Json::as_array)
                .map(|items| items.iter().filter_map(Json::as_str).collect())
                .unwrap_or_default()
        };
        let nodes = uris("nodes")
            .into_iter()
            .map(|uri| Ok(self.hydrator.node_ref(identity(uri)?, None)))
            .collect::<Result<Vec<_>, GraphError>>()?;
        let rel_uris = uris("relationships");
        let directions = uris("directions");
        if nodes.len() != rel_uris.len() + 1 {
            return Err(GraphError::MalformedPath(format!(
                "{} nodes for {} relationships",
                nodes.len(),
                rel_uris.len()
            )));
        }
        let mut relationships = Vec::with_capacity(rel_uris.len());
        for (i, uri) in rel_uris.into_iter().enumerate() {
            let (a, b) = (&nodes[i], &nodes[i + 1]);
            let (start, end) = match directions.get(i) {
                Some(&"<-") => (b, a),
                _ => (a, b),
            };
            relationships.push(self.hydrator.relationship_ref(identity(uri)?, start, end));
        }
        Ok(Path::from_parts(nodes, relationships))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrate::EntityCache;
    use serde_json::json;

    fn hydrate(cache: &EntityCache, json: Json) -> Value {
        RestHydrator::new(Hydrator::new(cache))
            .cell(&json, None)
            .unwrap()
    }

    #[test]
    fn statement_body_shape() {
        let stmt = Statement::new("RETURN $x".into(), serde_json::Map::from_iter([("x".to_string(), json!(1))]));
        let body = serde_json::to_value(StatementBatch { statements: &[stmt] }).unwrap();
        assert_eq!(
            body,
            json!({"statements": [{
                "statement": "RETURN $x",
                "parameters": {"x": 1},
                "resultDataContents": ["rest"],
                "includeStats": true
            }]})
        );
    }

    #[test]
    fn node_identity_is_stable() {
        let cache = EntityCache::new();
        let raw = json!({
            "self": "http://localhost:7474/db/data/node/5",
            "metadata": {"id": 5, "labels": ["Person"]},
            "data": {"name": "Alice"}
        });
        let a = hydrate(&cache, raw.clone());
        let b = hydrate(&cache, raw);
        let (a, b) = (a.as_node().unwrap(), b.as_node().unwrap());
        assert!(a.same(b));
        assert_eq!(a.identity(), Some(5));
        assert_eq!(a.labels(), vec!["Person".to_string()]);
        assert_eq!(a.get("name"), Some(Value::from("Alice")));
    }

    #[test]
    fn relationship_endpoints_come_from_uris() {
        let cache = EntityCache::new();
        let rel = hydrate(
            &cache,
            json!({
                "self": "http://localhost:7474/db/data/relationship/3",
                "start": "http://localhost:7474/db/data/node/1",
                "end": "http://localhost:7474/db/data/node/2",
                "type": "KNOWS",
                "data": {"since": 1999}
            }),
        );
        let rel = rel.as_relationship().unwrap();
        assert_eq!(rel.identity(), Some(3));
        assert_eq!(rel.start_node().identity(), Some(1));
        assert_eq!(rel.end_node().identity(), Some(2));
        assert_eq!(rel.rel_type(), "KNOWS");
    }

    #[test]
    fn path_follows_directions() {
        let cache = EntityCache::new();
        let path = hydrate(
            &cache,
            json!({
                "start": "http://h/db/data/node/1",
                "end": "http://h/db/data/node/3",
                "length": 2,
                "nodes": ["http://h/db/data/node/1", "http://h/db/data/node/2", "http://h/db/data/node/3"],
                "relationships": ["http://h/db/data/relationship/10", "http://h/db/data/relationship/11"],
                "directions": ["->", "<-"]
            }),
        );
        let path = path.as_path().unwrap();
        assert_eq!(path.len(), 2);
        let second = &path.relationships()[1];
        assert_eq!(second.start_node().identity(), Some(3));
        assert_eq!(second.end_node().identity(), Some(2));
    }

    #[test]
    fn plain_objects_are_maps() {
        let cache = EntityCache::new();
        let value = hydrate(&cache, json!({"a": [1, 2.5, null]}));
        let map = value.as_map().unwrap();
        assert_eq!(
            map["a"],
            Value::List(vec![Value::Integer(1), Value::Float(2.5), Value::Null])
        );
    }

    #[test]
    fn stats_become_a_footer() {
        let result: StatementResult = serde_json::from_value(json!({
            "columns": ["n"],
            "data": [],
            "stats": {"contains_updates": true, "nodes_created": 2}
        }))
        .unwrap();
        let footer = footer(&result);
        let stats = footer["stats"].as_dict().unwrap();
        assert_eq!(stats["nodes_created"], BoltValue::Integer(2));
    }
}
