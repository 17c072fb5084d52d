//! Result summaries: update counters, plans and timing metadata.

use std::collections::HashMap;

use crate::hydrate::{EntityCache, Hydrator, Value};
use crate::types::{BoltDict, BoltValue};

/// Update counters reported by the server once a result is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
    pub system_updates: i64,
    reported_updates: Option<bool>,
}

impl Counters {
    /// Reads a stats map. Keys may be hyphenated (`nodes-created`) or
    /// underscored (`nodes_created`).
    pub fn from_stats(stats: &BoltDict) -> Self {
        let mut counters = Self::default();
        for (key, value) in stats {
            let key = key.replace('-', "_");
            if key == "contains_updates" {
                counters.reported_updates = value.as_bool();
                continue;
            }
            let Some(n) = value.as_int() else { continue };
            let slot = match key.as_str() {
                "nodes_created" => &mut counters.nodes_created,
                "nodes_deleted" => &mut counters.nodes_deleted,
                "relationships_created" | "relationship_created" => {
                    &mut counters.relationships_created
                }
                "relationships_deleted" | "relationship_deleted" => {
                    &mut counters.relationships_deleted
                }
                "properties_set" => &mut counters.properties_set,
                "labels_added" => &mut counters.labels_added,
                "labels_removed" => &mut counters.labels_removed,
                "indexes_added" => &mut counters.indexes_added,
                "indexes_removed" => &mut counters.indexes_removed,
                "constraints_added" => &mut counters.constraints_added,
                "constraints_removed" => &mut counters.constraints_removed,
                "system_updates" => &mut counters.system_updates,
                other => {
                    tracing::trace!(key = other, "ignoring unknown counter");
                    continue;
                }
            };
            *slot = n;
        }
        counters
    }

    /// True if the statement changed the graph.
    pub fn contains_updates(&self) -> bool {
        self.reported_updates.unwrap_or_else(|| {
            [
                self.nodes_created,
                self.nodes_deleted,
                self.relationships_created,
                self.relationships_deleted,
                self.properties_set,
                self.labels_added,
                self.labels_removed,
                self.indexes_added,
                self.indexes_removed,
                self.constraints_added,
                self.constraints_removed,
            ]
            .iter()
            .any(|n| *n > 0)
        })
    }
}

/// One operator of an execution plan or profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub operator_type: String,
    pub identifiers: Vec<String>,
    pub arguments: HashMap<String, Value>,
    pub children: Vec<Plan>,
    /// Present for profiles only.
    pub db_hits: Option<i64>,
    pub rows: Option<i64>,
}

impl Plan {
    pub(crate) fn from_bolt(raw: &BoltDict) -> Self {
        let cache = EntityCache::new();
        let hydrator = Hydrator::new(&cache).lenient(true);
        let arguments = raw
            .get("args")
            .and_then(BoltValue::as_dict)
            .and_then(|args| hydrator.hydrate_dict(args).ok())
            .unwrap_or_default();
        Self {
            operator_type: raw
                .get("operatorType")
                .and_then(BoltValue::as_str)
                .unwrap_or_default()
                .to_string(),
            identifiers: raw
                .get("identifiers")
                .and_then(BoltValue::as_list)
                .map(|ids| ids.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default(),
            arguments,
            children: raw
                .get("children")
                .and_then(BoltValue::as_list)
                .map(|kids| kids.iter().filter_map(BoltValue::as_dict).map(Plan::from_bolt).collect())
                .unwrap_or_default(),
            db_hits: raw.get("dbHits").and_then(BoltValue::as_int),
            rows: raw.get("rows").and_then(BoltValue::as_int),
        }
    }
}

/// Metadata available once a result has been fully received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub counters: Counters,
    pub plan: Option<Plan>,
    /// `r`, `w`, `rw` or `s`.
    pub query_type: Option<String>,
    pub bookmark: Option<String>,
    pub database: Option<String>,
    /// Milliseconds until the first row was available.
    pub available_after: Option<i64>,
    /// Milliseconds until the last row was consumed.
    pub consumed_after: Option<i64>,
}

impl Summary {
    /// Builds a summary from the RUN header and the final PULL/DISCARD footer.
    pub(crate) fn from_metadata(header: &BoltDict, footer: &BoltDict) -> Self {
        let get = |key: &str| footer.get(key).or_else(|| header.get(key));
        let plan = get("profile")
            .or_else(|| get("plan"))
            .and_then(BoltValue::as_dict)
            .map(|p| match p.get("root").and_then(BoltValue::as_dict) {
                Some(root) => Plan::from_bolt(root),
                None => Plan::from_bolt(p),
            });
        Self {
            counters: get("stats")
                .and_then(BoltValue::as_dict)
                .map(Counters::from_stats)
                .unwrap_or_default(),
            plan,
            query_type: get("type").and_then(BoltValue::as_str).map(String::from),
            bookmark: get("bookmark").and_then(BoltValue::as_str).map(String::from),
            database: get("db").and_then(BoltValue::as_str).map(String::from),
            available_after: get("t_first").and_then(BoltValue::as_int),
            consumed_after: get("t_last").and_then(BoltValue::as_int),
        }
    }
}
