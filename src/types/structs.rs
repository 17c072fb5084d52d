//! Fixed-layout PackStream structures: graph entities, temporal and spatial
//! values.
//!
//! Each type knows its own tag and field order, so the codec only ever
//! deals with `(tag, fields)` pairs.

use super::{BoltDict, BoltValue};
use crate::error::GraphError;

/// A structure with a known tag and field layout.
pub trait Structure: Sized {
    const TAG: u8;
    const NAME: &'static str;

    fn to_fields(&self) -> Vec<BoltValue>;

    fn from_fields(fields: Vec<BoltValue>) -> Result<Self, GraphError>;
}

/// A single structure field.
pub(crate) trait FieldValue: Sized {
    fn into_value(self) -> BoltValue;
    fn from_value(value: BoltValue) -> Option<Self>;
}

impl FieldValue for i64 {
    fn into_value(self) -> BoltValue {
        BoltValue::Integer(self)
    }
    fn from_value(value: BoltValue) -> Option<Self> {
        value.as_int()
    }
}

impl FieldValue for f64 {
    fn into_value(self) -> BoltValue {
        BoltValue::Float(self)
    }
    fn from_value(value: BoltValue) -> Option<Self> {
        match value {
            BoltValue::Float(f) => Some(f),
            _ => None,
        }
    }
}

impl FieldValue for String {
    fn into_value(self) -> BoltValue {
        BoltValue::String(self)
    }
    fn from_value(value: BoltValue) -> Option<Self> {
        match value {
            BoltValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl FieldValue for BoltDict {
    fn into_value(self) -> BoltValue {
        BoltValue::Dict(self)
    }
    fn from_value(value: BoltValue) -> Option<Self> {
        match value {
            BoltValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn into_value(self) -> BoltValue {
        BoltValue::List(self.into_iter().map(FieldValue::into_value).collect())
    }
    fn from_value(value: BoltValue) -> Option<Self> {
        match value {
            BoltValue::List(items) => items.into_iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

/// Consumes structure fields in order, failing with the structure's name.
pub(crate) struct Fields {
    name: &'static str,
    items: std::vec::IntoIter<BoltValue>,
    position: usize,
}

impl Fields {
    pub(crate) fn new(name: &'static str, fields: Vec<BoltValue>) -> Self {
        Self {
            name,
            items: fields.into_iter(),
            position: 0,
        }
    }

    pub(crate) fn next<T: FieldValue>(&mut self) -> Result<T, GraphError> {
        let position = self.position;
        self.position += 1;
        let value = self.items.next().ok_or_else(|| {
            GraphError::Protocol(format!("{} is missing field {position}", self.name))
        })?;
        T::from_value(value).ok_or_else(|| {
            GraphError::Protocol(format!("{} has a mistyped field {position}", self.name))
        })
    }

    /// The next field if the structure has one. Bolt 4 entities stop before
    /// their element ids.
    pub(crate) fn optional<T: FieldValue>(&mut self) -> Result<Option<T>, GraphError> {
        if self.items.len() == 0 {
            return Ok(None);
        }
        self.next().map(Some)
    }
}

macro_rules! flat_structure {
    ($(#[$meta:meta])* $name:ident = $tag:literal { $($(#[$fmeta:meta])* $field:ident: $ty:ty),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty,)+
        }

        impl Structure for $name {
            const TAG: u8 = $tag;
            const NAME: &'static str = stringify!($name);

            fn to_fields(&self) -> Vec<BoltValue> {
                vec![$(self.$field.clone().into_value()),+]
            }

            fn from_fields(fields: Vec<BoltValue>) -> Result<Self, GraphError> {
                let mut fields = Fields::new(Self::NAME, fields);
                Ok(Self {
                    $($field: fields.next()?,)+
                })
            }
        }
    };
}

// -- Graph entities --

#[derive(Debug, Clone, PartialEq)]
pub struct BoltNode {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: BoltDict,
    pub element_id: String,
}

impl Structure for BoltNode {
    const TAG: u8 = 0x4E;
    const NAME: &'static str = "Node";

    fn to_fields(&self) -> Vec<BoltValue> {
        vec![
            self.id.into_value(),
            self.labels.clone().into_value(),
            self.properties.clone().into_value(),
            self.element_id.clone().into_value(),
        ]
    }

    fn from_fields(fields: Vec<BoltValue>) -> Result<Self, GraphError> {
        let mut fields = Fields::new(Self::NAME, fields);
        let id = fields.next()?;
        Ok(Self {
            id,
            labels: fields.next()?,
            properties: fields.next()?,
            element_id: fields.optional()?.unwrap_or_else(|| id.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoltRelationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub rel_type: String,
    pub properties: BoltDict,
    pub element_id: String,
    pub start_element_id: String,
    pub end_element_id: String,
}

impl Structure for BoltRelationship {
    const TAG: u8 = 0x52;
    const NAME: &'static str = "Relationship";

    fn to_fields(&self) -> Vec<BoltValue> {
        vec![
            self.id.into_value(),
            self.start_node_id.into_value(),
            self.end_node_id.into_value(),
            self.rel_type.clone().into_value(),
            self.properties.clone().into_value(),
            self.element_id.clone().into_value(),
            self.start_element_id.clone().into_value(),
            self.end_element_id.clone().into_value(),
        ]
    }

    fn from_fields(fields: Vec<BoltValue>) -> Result<Self, GraphError> {
        let mut fields = Fields::new(Self::NAME, fields);
        let id: i64 = fields.next()?;
        let start_node_id: i64 = fields.next()?;
        let end_node_id: i64 = fields.next()?;
        let rel_type = fields.next()?;
        let properties = fields.next()?;
        let element_id = fields.optional()?.unwrap_or_else(|| id.to_string());
        let start_element_id = fields
            .optional()?
            .unwrap_or_else(|| start_node_id.to_string());
        let end_element_id = fields
            .optional()?
            .unwrap_or_else(|| end_node_id.to_string());
        Ok(Self {
            id,
            start_node_id,
            end_node_id,
            rel_type,
            properties,
            element_id,
            start_element_id,
            end_element_id,
        })
    }
}

/// A relationship inside a path; its endpoints follow from the path indices.
#[derive(Debug, Clone, PartialEq)]
pub struct BoltUnboundRelationship {
    pub id: i64,
    pub rel_type: String,
    pub properties: BoltDict,
    pub element_id: String,
}

impl Structure for BoltUnboundRelationship {
    const TAG: u8 = 0x72;
    const NAME: &'static str = "UnboundRelationship";

    fn to_fields(&self) -> Vec<BoltValue> {
        vec![
            self.id.into_value(),
            self.rel_type.clone().into_value(),
            self.properties.clone().into_value(),
            self.element_id.clone().into_value(),
        ]
    }

    fn from_fields(fields: Vec<BoltValue>) -> Result<Self, GraphError> {
        let mut fields = Fields::new(Self::NAME, fields);
        let id = fields.next()?;
        Ok(Self {
            id,
            rel_type: fields.next()?,
            properties: fields.next()?,
            element_id: fields.optional()?.unwrap_or_else(|| id.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoltPath {
    pub nodes: Vec<BoltNode>,
    pub rels: Vec<BoltUnboundRelationship>,
    pub indices: Vec<i64>,
}

impl Structure for BoltPath {
    const TAG: u8 = 0x50;
    const NAME: &'static str = "Path";

    fn to_fields(&self) -> Vec<BoltValue> {
        vec![
            BoltValue::List(self.nodes.iter().cloned().map(BoltValue::Node).collect()),
            BoltValue::List(
                self.rels
                    .iter()
                    .cloned()
                    .map(BoltValue::UnboundRelationship)
                    .collect(),
            ),
            self.indices.clone().into_value(),
        ]
    }

    fn from_fields(fields: Vec<BoltValue>) -> Result<Self, GraphError> {
        let mut fields = Fields::new(Self::NAME, fields);
        let nodes: Vec<BoltValue> = fields.next()?;
        let rels: Vec<BoltValue> = fields.next()?;
        Ok(Self {
            nodes: nodes
                .into_iter()
                .map(|v| match v {
                    BoltValue::Node(n) => Ok(n),
                    other => Err(GraphError::Protocol(format!("path node expected, got {other}"))),
                })
                .collect::<Result<_, _>>()?,
            rels: rels
                .into_iter()
                .map(|v| match v {
                    BoltValue::UnboundRelationship(r) => Ok(r),
                    other => Err(GraphError::Protocol(format!(
                        "path relationship expected, got {other}"
                    ))),
                })
                .collect::<Result<_, _>>()?,
            indices: fields.next()?,
        })
    }
}

impl FieldValue for BoltValue {
    fn into_value(self) -> BoltValue {
        self
    }
    fn from_value(value: BoltValue) -> Option<Self> {
        Some(value)
    }
}

// -- Temporal values --

flat_structure!(BoltDate = 0x44 {
    /// Days since the Unix epoch.
    days: i64,
});

flat_structure!(BoltTime = 0x54 {
    /// Nanoseconds since midnight.
    nanoseconds: i64,
    tz_offset_seconds: i64,
});

flat_structure!(BoltLocalTime = 0x74 { nanoseconds: i64 });

flat_structure!(BoltDateTime = 0x49 {
    /// Seconds since the Unix epoch.
    seconds: i64,
    nanoseconds: i64,
    tz_offset_seconds: i64,
});

flat_structure!(
    /// A date-time in a named zone.
    BoltDateTimeZoneId = 0x69 {
        seconds: i64,
        nanoseconds: i64,
        /// IANA zone identifier.
        tz_id: String,
    }
);

flat_structure!(BoltLocalDateTime = 0x64 {
    seconds: i64,
    nanoseconds: i64,
});

flat_structure!(BoltDuration = 0x45 {
    months: i64,
    days: i64,
    seconds: i64,
    nanoseconds: i64,
});

// -- Spatial values --

flat_structure!(BoltPoint2D = 0x58 { srid: i64, x: f64, y: f64 });

flat_structure!(BoltPoint3D = 0x59 {
    srid: i64,
    x: f64,
    y: f64,
    z: f64,
});

/// Rebuilds a typed value from a decoded structure. Unknown tags are kept
/// as opaque structures.
pub(crate) fn from_structure(tag: u8, fields: Vec<BoltValue>) -> Result<BoltValue, GraphError> {
    Ok(match tag {
        BoltNode::TAG => BoltValue::Node(BoltNode::from_fields(fields)?),
        BoltRelationship::TAG => BoltValue::Relationship(BoltRelationship::from_fields(fields)?),
        BoltUnboundRelationship::TAG => {
            BoltValue::UnboundRelationship(BoltUnboundRelationship::from_fields(fields)?)
        }
        BoltPath::TAG => BoltValue::Path(BoltPath::from_fields(fields)?),
        BoltDate::TAG => BoltValue::Date(BoltDate::from_fields(fields)?),
        BoltTime::TAG => BoltValue::Time(BoltTime::from_fields(fields)?),
        BoltLocalTime::TAG => BoltValue::LocalTime(BoltLocalTime::from_fields(fields)?),
        BoltDateTime::TAG => BoltValue::DateTime(BoltDateTime::from_fields(fields)?),
        BoltDateTimeZoneId::TAG => {
            BoltValue::DateTimeZoneId(BoltDateTimeZoneId::from_fields(fields)?)
        }
        BoltLocalDateTime::TAG => BoltValue::LocalDateTime(BoltLocalDateTime::from_fields(fields)?),
        BoltDuration::TAG => BoltValue::Duration(BoltDuration::from_fields(fields)?),
        BoltPoint2D::TAG => BoltValue::Point2D(BoltPoint2D::from_fields(fields)?),
        BoltPoint3D::TAG => BoltValue::Point3D(BoltPoint3D::from_fields(fields)?),
        tag => BoltValue::Structure { tag, fields },
    })
}

/// The `(tag, fields)` form of a structured value, or `None` for scalars
/// and collections.
pub(crate) fn to_structure(value: &BoltValue) -> Option<(u8, Vec<BoltValue>)> {
    fn of<S: Structure>(s: &S) -> Option<(u8, Vec<BoltValue>)> {
        Some((S::TAG, s.to_fields()))
    }
    match value {
        BoltValue::Node(v) => of(v),
        BoltValue::Relationship(v) => of(v),
        BoltValue::UnboundRelationship(v) => of(v),
        BoltValue::Path(v) => of(v),
        BoltValue::Date(v) => of(v),
        BoltValue::Time(v) => of(v),
        BoltValue::LocalTime(v) => of(v),
        BoltValue::DateTime(v) => of(v),
        BoltValue::DateTimeZoneId(v) => of(v),
        BoltValue::LocalDateTime(v) => of(v),
        BoltValue::Duration(v) => of(v),
        BoltValue::Point2D(v) => of(v),
        BoltValue::Point3D(v) => of(v),
        BoltValue::Structure { tag, fields } => Some((*tag, fields.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mistyped_field_names_the_structure() {
        let err = BoltDate::from_fields(vec![BoltValue::from("monday")]).unwrap_err();
        assert_eq!(err.to_string(), "protocol error: BoltDate has a mistyped field 0");
        let err = BoltPoint2D::from_fields(vec![BoltValue::Integer(4326)]).unwrap_err();
        assert!(err.to_string().contains("missing field 1"));
    }

    #[test]
    fn unknown_tags_stay_opaque() {
        let value = from_structure(0x7A, vec![BoltValue::Null]).unwrap();
        assert_eq!(
            to_structure(&value),
            Some((0x7A, vec![BoltValue::Null]))
        );
    }
}
