//! Immutable result rows.

use std::collections::HashMap;
use std::sync::Arc;

use crate::hydrate::Value;

/// Selects a field of a record by position or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Index(usize),
    Name(String),
}

impl From<usize> for Field {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl From<&str> for Field {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Field {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// One row of a result.
///
/// Keys are shared with every other record of the same result. When a key
/// occurs more than once, lookup by name resolves to its first column; the
/// others stay reachable by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(keys: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the first column called `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == name)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn field(&self, field: &Field) -> Option<&Value> {
        match field {
            Field::Index(i) => self.get_index(*i),
            Field::Name(name) => self.get(name),
        }
    }

    /// Every column position carrying `name`.
    pub fn positions_of(&self, name: &str) -> Vec<usize> {
        self.keys
            .iter()
            .enumerate()
            .filter_map(|(i, k)| (k == name).then_some(i))
            .collect()
    }

    /// Name-to-value mapping. Duplicate names keep their first column.
    pub fn data(&self) -> HashMap<String, Value> {
        let mut data = HashMap::with_capacity(self.keys.len());
        for (key, value) in self.keys.iter().zip(&self.values) {
            data.entry(key.clone()).or_insert_with(|| value.clone());
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(keys: &[&str], values: Vec<Value>) -> Record {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        Record::new(keys.into(), values)
    }

    #[test]
    fn duplicate_names_resolve_to_first_column() {
        let rec = record(&["n", "m", "n"], vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(rec.get("n"), Some(&Value::Integer(1)));
        assert_eq!(rec.positions_of("n"), vec![0, 2]);
        assert_eq!(rec.get_index(2), Some(&Value::Integer(3)));
        let data = rec.data();
        assert_eq!(data.len(), 2);
        assert_eq!(data["n"], Value::Integer(1));
    }

    #[test]
    fn field_lookup_by_position_or_name() {
        let rec = record(&["a", "b"], vec!["x".into(), "y".into()]);
        assert_eq!(rec.field(&Field::from(1)), Some(&Value::from("y")));
        assert_eq!(rec.field(&Field::from("a")), Some(&Value::from("x")));
        assert_eq!(rec.field(&Field::from("c")), None);
        assert_eq!(rec.field(&Field::from(5)), None);
    }
}
