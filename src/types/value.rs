use std::collections::HashMap;
use std::fmt;

use super::structs::*;

/// String-keyed PackStream map.
pub type BoltDict = HashMap<String, BoltValue>;

/// A value as it travels on the wire, before hydration.
#[derive(Debug, Clone, PartialEq)]
pub enum BoltValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<BoltValue>),
    Dict(BoltDict),
    Node(BoltNode),
    Relationship(BoltRelationship),
    UnboundRelationship(BoltUnboundRelationship),
    Path(BoltPath),
    Date(BoltDate),
    Time(BoltTime),
    LocalTime(BoltLocalTime),
    DateTime(BoltDateTime),
    DateTimeZoneId(BoltDateTimeZoneId),
    LocalDateTime(BoltLocalDateTime),
    Duration(BoltDuration),
    Point2D(BoltPoint2D),
    Point3D(BoltPoint3D),
    /// A structure with a tag this crate does not model. Kept intact so that
    /// hydration can reject the single value instead of the whole message.
    Structure { tag: u8, fields: Vec<BoltValue> },
}

impl BoltValue {
    pub fn as_str(&self) -> Option<&str> {
        if let Self::String(s) = self { Some(s) } else { None }
    }

    pub fn as_int(&self) -> Option<i64> {
        if let Self::Integer(i) = self { Some(*i) } else { None }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Self::Boolean(b) = self { Some(*b) } else { None }
    }

    pub fn as_list(&self) -> Option<&[BoltValue]> {
        if let Self::List(items) = self { Some(items) } else { None }
    }

    pub fn as_dict(&self) -> Option<&BoltDict> {
        if let Self::Dict(d) = self { Some(d) } else { None }
    }
}

macro_rules! from_impls {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(impl From<$ty> for BoltValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })+
    };
}

from_impls! {
    bool => Boolean,
    i64 => Integer,
    f64 => Float,
    String => String,
    Vec<u8> => Bytes,
    Vec<BoltValue> => List,
    BoltDict => Dict,
    BoltNode => Node,
    BoltRelationship => Relationship,
}

impl From<i32> for BoltValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<&str> for BoltValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

fn join<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl IntoIterator<Item = T>,
) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for BoltValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Self::List(items) => {
                f.write_str("[")?;
                join(f, items)?;
                f.write_str("]")
            }
            Self::Dict(dict) => {
                f.write_str("{")?;
                join(f, dict.iter().map(|(k, v)| format!("{k}: {v}")))?;
                f.write_str("}")
            }
            Self::Node(n) => write!(f, "({} :{})", n.element_id, n.labels.join(":")),
            Self::Relationship(r) => {
                write!(f, "({})-[{} :{}]->({})", r.start_element_id, r.element_id, r.rel_type, r.end_element_id)
            }
            Self::UnboundRelationship(r) => write!(f, "[{} :{}]", r.element_id, r.rel_type),
            Self::Path(p) => write!(f, "path of {} hops", p.rels.len()),
            Self::Structure { tag, fields } => {
                write!(f, "struct 0x{tag:02X}(")?;
                join(f, fields)?;
                f.write_str(")")
            }
            other => match to_structure(other) {
                Some((tag, fields)) => {
                    write!(f, "{}(", temporal_name(tag))?;
                    join(f, &fields)?;
                    f.write_str(")")
                }
                None => Ok(()),
            },
        }
    }
}

fn temporal_name(tag: u8) -> &'static str {
    match tag {
        BoltDate::TAG => "date",
        BoltTime::TAG => "time",
        BoltLocalTime::TAG => "localtime",
        BoltDateTime::TAG | BoltDateTimeZoneId::TAG => "datetime",
        BoltLocalDateTime::TAG => "localdatetime",
        BoltDuration::TAG => "duration",
        _ => "point",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_readable() {
        assert_eq!(BoltValue::from(vec![BoltValue::from(1), BoltValue::Null]).to_string(), "[1, null]");
        assert_eq!(BoltValue::Date(BoltDate { days: 3 }).to_string(), "date(3)");
        assert_eq!(
            BoltValue::DateTimeZoneId(BoltDateTimeZoneId {
                seconds: 1,
                nanoseconds: 0,
                tz_id: "Europe/Paris".into(),
            })
            .to_string(),
            "datetime(1, 0, \"Europe/Paris\")"
        );
    }
}
