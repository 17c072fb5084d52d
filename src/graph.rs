//! The entry point used by applications: a database endpoint plus a default
//! session, and a registry that hands out one `Graph` per endpoint.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{AuthToken, Config, Endpoint, Protocol};
use crate::connection::{Connector, TcpConnector};
use crate::error::GraphError;
use crate::hydrate::{Node, Params, Relationship, Value};
use crate::result::Cursor;
use crate::session::Session;
use crate::tx::{GraphObject, Transaction};

#[derive(Clone)]
enum Transport {
    Bolt(Arc<dyn Connector>),
    Http(Endpoint),
}

/// A graph database.
///
/// Statements issued directly on a `Graph` share its default session, and
/// with it the connection and entity cache. Every transaction runs in a
/// session of its own, so clones of a graph can hold transactions at the
/// same time.
#[derive(Clone)]
pub struct Graph {
    transport: Transport,
    config: Arc<Config>,
    session: Session,
}

impl Graph {
    /// Opens a graph at `uri`. Credentials embedded in the URI are used when
    /// `config` carries none. Nothing is sent until the first statement.
    pub fn open(uri: &str, config: Config) -> Result<Self, GraphError> {
        let (endpoint, uri_auth) = Endpoint::parse(uri)?;
        let config = match (uri_auth, &config.auth) {
            (Some(auth), AuthToken::None) => config.auth(auth),
            _ => config,
        };
        let transport = match endpoint.protocol {
            Protocol::Bolt if endpoint.secure => {
                return Err(GraphError::InvalidArgument(format!(
                    "{endpoint} needs a TLS connector; use Graph::with_connector"
                )));
            }
            Protocol::Bolt => Transport::Bolt(Arc::new(TcpConnector::new(&endpoint, &config))),
            Protocol::Http => Transport::Http(endpoint),
        };
        Self::build(transport, Arc::new(config))
    }

    /// A Bolt graph reached through a caller-supplied connector.
    pub fn with_connector(connector: Arc<dyn Connector>, config: Config) -> Self {
        let config = Arc::new(config);
        let session = Session::bolt(connector.clone(), config.clone());
        Self {
            transport: Transport::Bolt(connector),
            config,
            session,
        }
    }

    fn build(transport: Transport, config: Arc<Config>) -> Result<Self, GraphError> {
        let session = Self::new_session(&transport, &config)?;
        Ok(Self {
            transport,
            config,
            session,
        })
    }

    fn new_session(transport: &Transport, config: &Arc<Config>) -> Result<Session, GraphError> {
        match transport {
            Transport::Bolt(connector) => Ok(Session::bolt(connector.clone(), config.clone())),
            Transport::Http(endpoint) => Session::http(endpoint, config.clone()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The session behind the statement methods of this graph.
    pub fn default_session(&self) -> &Session {
        &self.session
    }

    /// Opens a new session with its own connection and entity cache.
    pub fn session(&self) -> Result<Session, GraphError> {
        Self::new_session(&self.transport, &self.config)
    }

    /// Runs `statement` in its own autocommit transaction.
    pub async fn run(&self, statement: &str, params: Params) -> Result<Cursor, GraphError> {
        self.session.run(statement, params).await
    }

    /// Runs `statement` and returns the first field of its first record.
    pub async fn evaluate(&self, statement: &str, params: Params) -> Result<Option<Value>, GraphError> {
        self.session.evaluate(statement, params).await
    }

    /// Starts a transaction in a new session with its own connection and
    /// entity cache.
    pub fn begin(&self) -> Result<Transaction, GraphError> {
        self.session()?.begin()
    }

    pub async fn create<O: GraphObject + ?Sized>(&self, object: &O) -> Result<(), GraphError> {
        let tx = self.begin()?;
        tx.create(object).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn merge<O: GraphObject + ?Sized>(
        &self,
        object: &O,
        primary_label: Option<&str>,
        primary_key: Option<&str>,
    ) -> Result<(), GraphError> {
        let tx = self.begin()?;
        tx.merge(object, primary_label, primary_key).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete<O: GraphObject + ?Sized>(&self, object: &O) -> Result<(), GraphError> {
        let tx = self.begin()?;
        tx.delete(object).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn pull<O: GraphObject + ?Sized>(&self, object: &O) -> Result<(), GraphError> {
        let tx = self.begin()?;
        tx.pull(object).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn push<O: GraphObject + ?Sized>(&self, object: &O) -> Result<(), GraphError> {
        let tx = self.begin()?;
        tx.push(object).await?;
        tx.commit().await?;
        Ok(())
    }

    /// True when every part of `object` is bound and still on the server.
    pub async fn exists<O: GraphObject + ?Sized>(&self, object: &O) -> Result<bool, GraphError> {
        let tx = self.begin()?;
        let found = tx.exists(object).await?;
        tx.commit().await?;
        Ok(found)
    }

    /// The node with server identity `id`, from the cache when possible.
    pub async fn node(&self, id: i64) -> Result<Option<Node>, GraphError> {
        if let Some(node) = self.session.cache().node(id) {
            if !node.is_stale() && node.identity() == Some(id) {
                return Ok(Some(node));
            }
        }
        let value = self
            .evaluate("MATCH (n) WHERE id(n) = $x RETURN n", id_param(id))
            .await?;
        Ok(value.and_then(|v| v.as_node().cloned()))
    }

    /// The relationship with server identity `id`, from the cache when
    /// possible.
    pub async fn relationship(&self, id: i64) -> Result<Option<Relationship>, GraphError> {
        if let Some(rel) = self.session.cache().relationship(id) {
            if !rel.is_stale() && rel.identity() == Some(id) {
                return Ok(Some(rel));
            }
        }
        let value = self
            .evaluate("MATCH ()-[r]->() WHERE id(r) = $x RETURN r", id_param(id))
            .await?;
        Ok(value.and_then(|v| v.as_relationship().cloned()))
    }

    /// Nodes carrying `label`, narrowed to those whose property equals the
    /// given value when `property` is set.
    pub async fn find(&self, label: &str, property: Option<(&str, Value)>) -> Result<Vec<Node>, GraphError> {
        self.find_nodes(label, property, None).await
    }

    pub async fn find_one(&self, label: &str, property: Option<(&str, Value)>) -> Result<Option<Node>, GraphError> {
        Ok(self.find_nodes(label, property, Some(1)).await?.pop())
    }

    async fn find_nodes(
        &self,
        label: &str,
        property: Option<(&str, Value)>,
        limit: Option<usize>,
    ) -> Result<Vec<Node>, GraphError> {
        let mut params = Params::from([("label".to_string(), Value::from(label))]);
        let mut statement = "MATCH (n:«label»)".to_string();
        if let Some((key, value)) = property {
            statement.push_str(" WHERE n[$key] = $value");
            params.insert("key".to_string(), Value::from(key));
            params.insert("value".to_string(), value);
        }
        statement.push_str(" RETURN n");
        if let Some(limit) = limit {
            statement.push_str(&format!(" LIMIT {limit}"));
        }
        let mut cursor = self.run(&statement, params).await?;
        let mut nodes = Vec::new();
        while let Some(record) = cursor.next().await? {
            nodes.extend(record.get("n").and_then(Value::as_node).cloned());
        }
        Ok(nodes)
    }

    /// Relationships from `start` to `end` of type `rel_type`. Omitted
    /// endpoints and type match anything; given endpoints must be bound.
    pub async fn match_(
        &self,
        start: Option<&Node>,
        rel_type: Option<&str>,
        end: Option<&Node>,
    ) -> Result<Vec<Relationship>, GraphError> {
        self.match_relationships(start, rel_type, end, None).await
    }

    pub async fn match_one(
        &self,
        start: Option<&Node>,
        rel_type: Option<&str>,
        end: Option<&Node>,
    ) -> Result<Option<Relationship>, GraphError> {
        Ok(self
            .match_relationships(start, rel_type, end, Some(1))
            .await?
            .pop())
    }

    async fn match_relationships(
        &self,
        start: Option<&Node>,
        rel_type: Option<&str>,
        end: Option<&Node>,
        limit: Option<usize>,
    ) -> Result<Vec<Relationship>, GraphError> {
        let mut params = Params::new();
        let mut statement = "MATCH (a)-[r".to_string();
        if let Some(rel_type) = rel_type {
            statement.push_str(":«type»");
            params.insert("type".to_string(), Value::from(rel_type));
        }
        statement.push_str("]->(b)");
        let mut conditions = Vec::new();
        for (alias, node) in [("a", start), ("b", end)] {
            let Some(node) = node else { continue };
            let id = node.identity().ok_or_else(|| {
                GraphError::InvalidArgument("relationship endpoints must be bound".into())
            })?;
            conditions.push(format!("id({alias}) = ${alias}"));
            params.insert(alias.to_string(), Value::Integer(id));
        }
        if !conditions.is_empty() {
            statement.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        statement.push_str(" RETURN r");
        if let Some(limit) = limit {
            statement.push_str(&format!(" LIMIT {limit}"));
        }
        let mut cursor = self.run(&statement, params).await?;
        let mut rels = Vec::new();
        while let Some(record) = cursor.next().await? {
            rels.extend(record.get("r").and_then(Value::as_relationship).cloned());
        }
        Ok(rels)
    }

    /// Deletes every node and relationship and forgets all cached entities.
    pub async fn delete_all(&self) -> Result<(), GraphError> {
        let mut cursor = self.run("MATCH (n) DETACH DELETE n", Params::new()).await?;
        cursor.close().await?;
        self.session.clear_cache();
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.session.clear_cache();
    }

    /// Closes the default session. The next statement reconnects.
    pub async fn close(&self) {
        self.session.close().await;
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.transport {
            Transport::Bolt(connector) => connector.target(),
            Transport::Http(endpoint) => endpoint.to_string(),
        };
        f.debug_struct("Graph")
            .field("target", &target)
            .field("session", &self.session)
            .finish()
    }
}

fn id_param(id: i64) -> Params {
    Params::from([("x".to_string(), Value::Integer(id))])
}

/// Hands out one [`Graph`] per endpoint.
///
/// Pass a registry to the code that needs graphs instead of keeping graphs
/// in globals; two registries never share a graph.
#[derive(Debug, Default)]
pub struct Registry {
    config: Config,
    graphs: Mutex<HashMap<Endpoint, Graph>>,
}

impl Registry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            graphs: Mutex::new(HashMap::new()),
        }
    }

    /// The graph at `uri`, opened on first request.
    pub fn graph(&self, uri: &str) -> Result<Graph, GraphError> {
        let (endpoint, _) = Endpoint::parse(uri)?;
        let mut graphs = self.graphs.lock();
        if let Some(graph) = graphs.get(&endpoint) {
            return Ok(graph.clone());
        }
        let graph = Graph::open(uri, self.config.clone())?;
        tracing::debug!(endpoint = %endpoint, "registered graph");
        graphs.insert(endpoint, graph.clone());
        Ok(graph)
    }

    /// Drops the graph registered for `uri`, if any.
    pub fn forget(&self, uri: &str) -> Result<Option<Graph>, GraphError> {
        let (endpoint, _) = Endpoint::parse(uri)?;
        Ok(self.graphs.lock().remove(&endpoint))
    }

    pub fn len(&self) -> usize {
        self.graphs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
