//! Hydrated result values.

use std::collections::HashMap;

use super::entity::{Node, Path, Relationship};
use crate::error::GraphError;
use crate::types::{
    BoltDate, BoltDateTime, BoltDateTimeZoneId, BoltDict, BoltDuration, BoltLocalDateTime,
    BoltLocalTime, BoltPoint2D, BoltPoint3D, BoltTime, BoltValue,
};

/// Statement parameters.
pub type Params = HashMap<String, Value>;

/// A value as seen by application code.
///
/// Graph entities are shared proxies: two values holding the same server
/// entity compare equal because they hold the same proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Node(Node),
    Relationship(Relationship),
    Path(Path),
    Date(BoltDate),
    Time(BoltTime),
    LocalTime(BoltLocalTime),
    DateTime(BoltDateTime),
    DateTimeZoneId(BoltDateTimeZoneId),
    LocalDateTime(BoltLocalDateTime),
    Duration(BoltDuration),
    Point2D(BoltPoint2D),
    Point3D(BoltPoint3D),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Self::Relationship(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Converts to a wire value for use as a bound parameter.
    ///
    /// Graph entities cannot travel as parameters; pass their identity instead.
    pub fn to_bolt(&self) -> Result<BoltValue, GraphError> {
        Ok(match self {
            Self::Null => BoltValue::Null,
            Self::Boolean(b) => BoltValue::Boolean(*b),
            Self::Integer(i) => BoltValue::Integer(*i),
            Self::Float(f) => BoltValue::Float(*f),
            Self::String(s) => BoltValue::String(s.clone()),
            Self::Bytes(b) => BoltValue::Bytes(b.clone()),
            Self::List(items) => {
                BoltValue::List(items.iter().map(Value::to_bolt).collect::<Result<_, _>>()?)
            }
            Self::Map(m) => BoltValue::Dict(map_to_bolt(m)?),
            Self::Date(v) => BoltValue::Date(v.clone()),
            Self::Time(v) => BoltValue::Time(v.clone()),
            Self::LocalTime(v) => BoltValue::LocalTime(v.clone()),
            Self::DateTime(v) => BoltValue::DateTime(v.clone()),
            Self::DateTimeZoneId(v) => BoltValue::DateTimeZoneId(v.clone()),
            Self::LocalDateTime(v) => BoltValue::LocalDateTime(v.clone()),
            Self::Duration(v) => BoltValue::Duration(v.clone()),
            Self::Point2D(v) => BoltValue::Point2D(v.clone()),
            Self::Point3D(v) => BoltValue::Point3D(v.clone()),
            Self::Node(_) | Self::Relationship(_) | Self::Path(_) => {
                return Err(GraphError::InvalidArgument(
                    "graph entities cannot be sent as parameters".into(),
                ));
            }
        })
    }

    /// JSON rendering of scalar and collection values, for the HTTP channel.
    pub(crate) fn to_json(&self) -> Result<serde_json::Value, GraphError> {
        use serde_json::Value as Json;
        Ok(match self {
            Self::Null => Json::Null,
            Self::Boolean(b) => Json::Bool(*b),
            Self::Integer(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| GraphError::InvalidArgument(format!("{f} has no JSON form")))?,
            Self::String(s) => Json::String(s.clone()),
            Self::List(items) => {
                Json::Array(items.iter().map(Value::to_json).collect::<Result<_, _>>()?)
            }
            Self::Map(m) => Json::Object(
                m.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<_, GraphError>>()?,
            ),
            other => {
                return Err(GraphError::InvalidArgument(format!(
                    "{other:?} cannot be sent over HTTP"
                )));
            }
        })
    }
}

pub(crate) fn map_to_bolt(map: &HashMap<String, Value>) -> Result<BoltDict, GraphError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), v.to_bolt()?)))
        .collect()
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(m: HashMap<String, Value>) -> Self {
        Self::Map(m)
    }
}

impl From<Node> for Value {
    fn from(n: Node) -> Self {
        Self::Node(n)
    }
}

impl From<Relationship> for Value {
    fn from(r: Relationship) -> Self {
        Self::Relationship(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
