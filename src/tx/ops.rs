//! Structural writes: statements generated from local entity graphs.

use std::collections::BTreeSet;

use async_trait::async_trait;

use super::Transaction;
use crate::error::GraphError;
use crate::hydrate::{Bindings, Node, Params, Path, Relationship, Subgraph, Value};

/// An entity graph that can be written to and refreshed from the server.
///
/// Every method works on the bound or unbound parts of the object as
/// appropriate and leaves the rest untouched.
#[async_trait]
pub trait GraphObject: Send + Sync {
    async fn db_create(&self, tx: &Transaction) -> Result<(), GraphError>;

    async fn db_merge(
        &self,
        tx: &Transaction,
        primary_label: Option<&str>,
        primary_key: Option<&str>,
    ) -> Result<(), GraphError>;

    async fn db_delete(&self, tx: &Transaction) -> Result<(), GraphError>;

    async fn db_pull(&self, tx: &Transaction) -> Result<(), GraphError>;

    async fn db_push(&self, tx: &Transaction) -> Result<(), GraphError>;

    /// True when every part is bound and still present on the server.
    async fn db_exists(&self, tx: &Transaction) -> Result<bool, GraphError>;
}

fn quoted(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn label_clause<'a>(labels: impl IntoIterator<Item = &'a String>) -> String {
    labels.into_iter().map(|l| format!(":{}", quoted(l))).collect()
}

/// One statement that matches the bound nodes of a subgraph by identity,
/// creates (or merges) everything unbound and returns the new entities.
#[derive(Debug, Default)]
pub(crate) struct CreateStatement {
    matches: Vec<String>,
    writes: Vec<String>,
    returns: Vec<String>,
    params: Params,
    bindings: Bindings,
}

impl CreateStatement {
    /// `CREATE` for every unbound node and relationship.
    pub(crate) fn create(graph: &Subgraph) -> Self {
        let mut stmt = Self::default();
        for (i, node) in graph.nodes().iter().enumerate() {
            let (alias, param) = (format!("a{i}"), format!("x{i}"));
            match node.identity() {
                Some(id) => stmt.match_node(&alias, &param, id),
                None => {
                    stmt.writes.push(format!(
                        "({alias}{} ${param})",
                        label_clause(&node.labels())
                    ));
                    stmt.params.insert(param, Value::Map(node.properties()));
                    stmt.bind(alias, Value::Node(node.clone()));
                }
            }
        }
        for (i, rel) in graph.relationships().iter().enumerate() {
            if rel.is_bound() {
                continue;
            }
            let (alias, param) = (format!("r{i}"), format!("y{i}"));
            let (start, end) = stmt.endpoints(graph, rel);
            stmt.writes.push(format!(
                "({start})-[{alias}:{} ${param}]->({end})",
                quoted(&rel.rel_type())
            ));
            stmt.params.insert(param, Value::Map(rel.properties()));
            stmt.bind(alias, Value::Relationship(rel.clone()));
        }
        stmt
    }

    /// `MERGE` for every unbound node on its primary label and key, and for
    /// every unbound relationship between its endpoints.
    pub(crate) fn merge(
        graph: &Subgraph,
        primary_label: Option<&str>,
        primary_key: Option<&str>,
    ) -> Result<Self, GraphError> {
        let mut stmt = Self::default();
        for (i, node) in graph.nodes().iter().enumerate() {
            let (alias, param) = (format!("a{i}"), format!("x{i}"));
            if let Some(id) = node.identity() {
                stmt.match_node(&alias, &param, id);
                continue;
            }
            let labels = node.labels();
            let properties = node.properties();
            let label = primary_label
                .map(String::from)
                .or_else(|| labels.first().cloned())
                .ok_or_else(|| {
                    GraphError::InvalidArgument("cannot merge a node without a label".into())
                })?;
            let keys: BTreeSet<&String> = match primary_key {
                Some(key) => properties.keys().filter(|k| k.as_str() == key).collect(),
                None => properties.keys().collect(),
            };
            if primary_key.is_some() && keys.is_empty() {
                return Err(GraphError::InvalidArgument(format!(
                    "node has no value for merge key {:?}",
                    primary_key.unwrap_or_default()
                )));
            }
            let pattern = keys
                .iter()
                .map(|k| format!("{}: ${param}.{}", quoted(k), quoted(k)))
                .collect::<Vec<_>>()
                .join(", ");
            let mut clause = format!("MERGE ({alias}:{} {{{pattern}}})", quoted(&label));
            let extra: Vec<&String> = labels.iter().filter(|l| **l != label).collect();
            if !extra.is_empty() {
                clause.push_str(&format!(" SET {alias}{}", label_clause(extra)));
            }
            clause.push_str(&format!(" SET {alias} = ${param}"));
            stmt.writes.push(clause);
            stmt.params.insert(param, Value::Map(properties));
            stmt.bind(alias, Value::Node(node.clone()));
        }
        for (i, rel) in graph.relationships().iter().enumerate() {
            if rel.is_bound() {
                continue;
            }
            let (alias, param) = (format!("r{i}"), format!("y{i}"));
            let (start, end) = stmt.endpoints(graph, rel);
            stmt.writes.push(format!(
                "MERGE ({start})-[{alias}:{}]->({end}) SET {alias} = ${param}",
                quoted(&rel.rel_type())
            ));
            stmt.params.insert(param, Value::Map(rel.properties()));
            stmt.bind(alias, Value::Relationship(rel.clone()));
        }
        Ok(stmt)
    }

    fn match_node(&mut self, alias: &str, param: &str, identity: i64) {
        self.matches
            .push(format!("MATCH ({alias}) WHERE id({alias}) = ${param}"));
        self.params.insert(param.to_string(), Value::Integer(identity));
    }

    fn bind(&mut self, alias: String, proxy: Value) {
        self.returns.push(alias.clone());
        self.bindings.insert(alias, proxy);
    }

    fn endpoints(&self, graph: &Subgraph, rel: &Relationship) -> (String, String) {
        let alias = |node: &Node| {
            let i = graph
                .nodes()
                .iter()
                .position(|n| n.same(node))
                .unwrap_or_default();
            format!("a{i}")
        };
        (alias(rel.start_node()), alias(rel.end_node()))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Statement text. All MATCH clauses precede the writes.
    pub(crate) fn text(&self, merge: bool) -> String {
        let mut clauses = self.matches.clone();
        if merge {
            clauses.extend(self.writes.iter().cloned());
        } else {
            clauses.push(format!("CREATE {}", self.writes.join(", ")));
        }
        clauses.push(format!("RETURN {} LIMIT 1", self.returns.join(", ")));
        clauses.join("\n")
    }

    async fn execute(self, tx: &Transaction, merge: bool) -> Result<(), GraphError> {
        if self.is_empty() {
            return Ok(());
        }
        let statement = self.text(merge);
        let mut result = tx.run_bound(&statement, self.params, self.bindings).await?;
        result.fetch_all().await?;
        Ok(())
    }
}

const EXISTS_QUERY: &str = "OPTIONAL MATCH (_) WHERE id(_) IN $ids\n\
    WITH count(_) AS nodes\n\
    OPTIONAL MATCH ()-[_]->() WHERE id(_) IN $rids\n\
    RETURN nodes, count(_) AS relationships";

fn id_list(ids: &[i64]) -> Params {
    Params::from([(
        "ids".to_string(),
        Value::List(ids.iter().copied().map(Value::Integer).collect()),
    )])
}

fn id_param(identity: i64) -> Params {
    Params::from([("x".to_string(), Value::Integer(identity))])
}

#[async_trait]
impl GraphObject for Subgraph {
    async fn db_create(&self, tx: &Transaction) -> Result<(), GraphError> {
        CreateStatement::create(self).execute(tx, false).await
    }

    async fn db_merge(
        &self,
        tx: &Transaction,
        primary_label: Option<&str>,
        primary_key: Option<&str>,
    ) -> Result<(), GraphError> {
        CreateStatement::merge(self, primary_label, primary_key)?
            .execute(tx, true)
            .await
    }

    async fn db_delete(&self, tx: &Transaction) -> Result<(), GraphError> {
        let rel_ids: Vec<i64> = self.relationships().iter().filter_map(Relationship::identity).collect();
        let node_ids: Vec<i64> = self.nodes().iter().filter_map(Node::identity).collect();
        let mut pending = Vec::new();
        if !rel_ids.is_empty() {
            pending.push(
                tx.run_bound(
                    "MATCH ()-[_]->() WHERE id(_) IN $ids DELETE _",
                    id_list(&rel_ids),
                    Bindings::new(),
                )
                .await?,
            );
        }
        if !node_ids.is_empty() {
            pending.push(
                tx.run_bound(
                    "MATCH (_) WHERE id(_) IN $ids DETACH DELETE _",
                    id_list(&node_ids),
                    Bindings::new(),
                )
                .await?,
            );
        }
        for mut result in pending {
            result.fetch_all().await?;
        }

        let cache = tx.session().cache();
        for rel in self.relationships() {
            if let Some(id) = rel.identity() {
                cache.evict_relationship(id);
                rel.unbind();
            }
        }
        for node in self.nodes() {
            if let Some(id) = node.identity() {
                cache.evict_node(id);
                node.unbind();
            }
        }
        Ok(())
    }

    async fn db_pull(&self, tx: &Transaction) -> Result<(), GraphError> {
        let mut pending = Vec::new();
        for node in self.nodes() {
            if let Some(id) = node.identity() {
                let bindings = Bindings::from([("_".to_string(), Value::Node(node.clone()))]);
                let result = tx
                    .run_bound("MATCH (_) WHERE id(_) = $x RETURN _", id_param(id), bindings)
                    .await?;
                pending.push((format!("node {id}"), result));
            }
        }
        for rel in self.relationships() {
            if let Some(id) = rel.identity() {
                let bindings = Bindings::from([("_".to_string(), Value::Relationship(rel.clone()))]);
                let result = tx
                    .run_bound(
                        "MATCH ()-[_]->() WHERE id(_) = $x RETURN _",
                        id_param(id),
                        bindings,
                    )
                    .await?;
                pending.push((format!("relationship {id}"), result));
            }
        }
        for (what, mut result) in pending {
            if result.fetch_all().await?.is_empty() {
                return Err(GraphError::InvalidArgument(format!("{what} no longer exists")));
            }
        }
        Ok(())
    }

    async fn db_push(&self, tx: &Transaction) -> Result<(), GraphError> {
        let mut pending = Vec::new();
        for node in self.nodes() {
            let Some(id) = node.identity() else { continue };
            let local: BTreeSet<String> = node.labels().into_iter().collect();
            let remote = node.remote_labels();
            let mut clauses = vec!["MATCH (_) WHERE id(_) = $x".to_string(), "SET _ = $y".to_string()];
            let removed: Vec<&String> = remote.difference(&local).collect();
            if !removed.is_empty() {
                clauses.push(format!("REMOVE _{}", label_clause(removed)));
            }
            let added: Vec<&String> = local.difference(&remote).collect();
            if !added.is_empty() {
                clauses.push(format!("SET _{}", label_clause(added)));
            }
            let mut params = id_param(id);
            params.insert("y".to_string(), Value::Map(node.properties()));
            let result = tx.run_bound(&clauses.join("\n"), params, Bindings::new()).await?;
            pending.push((Some((node.clone(), local)), result));
        }
        for rel in self.relationships() {
            let Some(id) = rel.identity() else { continue };
            let mut params = id_param(id);
            params.insert("y".to_string(), Value::Map(rel.properties()));
            let result = tx
                .run_bound(
                    "MATCH ()-[_]->() WHERE id(_) = $x SET _ = $y",
                    params,
                    Bindings::new(),
                )
                .await?;
            pending.push((None, result));
        }
        for (node, mut result) in pending {
            result.fetch_all().await?;
            if let Some((node, labels)) = node {
                node.set_remote_labels(labels);
            }
        }
        Ok(())
    }

    async fn db_exists(&self, tx: &Transaction) -> Result<bool, GraphError> {
        let node_ids: Vec<i64> = self.nodes().iter().filter_map(Node::identity).collect();
        let rel_ids: Vec<i64> = self.relationships().iter().filter_map(Relationship::identity).collect();
        if node_ids.is_empty()
            || node_ids.len() < self.nodes().len()
            || rel_ids.len() < self.relationships().len()
        {
            return Ok(false);
        }
        let mut params = id_list(&node_ids);
        params.insert(
            "rids".to_string(),
            Value::List(rel_ids.iter().copied().map(Value::Integer).collect()),
        );
        let mut result = tx
            .run_bound(EXISTS_QUERY, params, Bindings::new())
            .await?;
        let Some(record) = result.fetch_next().await? else {
            return Ok(false);
        };
        result.fetch_all().await?;
        let count = |key: &str| record.get(key).and_then(Value::as_i64).unwrap_or_default();
        Ok(count("nodes") == node_ids.len() as i64 && count("relationships") == rel_ids.len() as i64)
    }
}

#[async_trait]
impl GraphObject for Node {
    async fn db_create(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self.clone()).db_create(tx).await
    }

    async fn db_merge(
        &self,
        tx: &Transaction,
        primary_label: Option<&str>,
        primary_key: Option<&str>,
    ) -> Result<(), GraphError> {
        Subgraph::from(self.clone())
            .db_merge(tx, primary_label, primary_key)
            .await
    }

    async fn db_delete(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self.clone()).db_delete(tx).await
    }

    async fn db_pull(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self.clone()).db_pull(tx).await
    }

    async fn db_push(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self.clone()).db_push(tx).await
    }
    async fn db_exists(&self, tx: &Transaction) -> Result<bool, GraphError> {
        Subgraph::from(self.clone()).db_exists(tx).await
    }
}

/// A path writes as the subgraph of its nodes and relationships.
#[async_trait]
impl GraphObject for Path {
    async fn db_create(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self).db_create(tx).await
    }

    async fn db_merge(
        &self,
        tx: &Transaction,
        primary_label: Option<&str>,
        primary_key: Option<&str>,
    ) -> Result<(), GraphError> {
        Subgraph::from(self)
            .db_merge(tx, primary_label, primary_key)
            .await
    }

    async fn db_delete(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self).db_delete(tx).await
    }

    async fn db_pull(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self).db_pull(tx).await
    }

    async fn db_push(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self).db_push(tx).await
    }
    async fn db_exists(&self, tx: &Transaction) -> Result<bool, GraphError> {
        Subgraph::from(self).db_exists(tx).await
    }
}

/// Deleting a relationship leaves its endpoints alone.
#[async_trait]
impl GraphObject for Relationship {
    async fn db_create(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self.clone()).db_create(tx).await
    }

    async fn db_merge(
        &self,
        tx: &Transaction,
        primary_label: Option<&str>,
        primary_key: Option<&str>,
    ) -> Result<(), GraphError> {
        Subgraph::from(self.clone())
            .db_merge(tx, primary_label, primary_key)
            .await
    }

    async fn db_delete(&self, tx: &Transaction) -> Result<(), GraphError> {
        let Some(id) = self.identity() else {
            return Ok(());
        };
        let mut result = tx
            .run_bound(
                "MATCH ()-[_]->() WHERE id(_) IN $ids DELETE _",
                id_list(&[id]),
                Bindings::new(),
            )
            .await?;
        result.fetch_all().await?;
        tx.session().cache().evict_relationship(id);
        self.unbind();
        Ok(())
    }

    async fn db_pull(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self.clone()).db_pull(tx).await
    }

    async fn db_push(&self, tx: &Transaction) -> Result<(), GraphError> {
        Subgraph::from(self.clone()).db_push(tx).await
    }
    async fn db_exists(&self, tx: &Transaction) -> Result<bool, GraphError> {
        Subgraph::from(self.clone()).db_exists(tx).await
    }
}
