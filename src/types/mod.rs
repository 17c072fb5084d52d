//! Wire-level values: PackStream primitives plus the structures Bolt defines
//! on top of them.

mod structs;
mod value;

pub use structs::{
    BoltDate, BoltDateTime, BoltDateTimeZoneId, BoltDuration, BoltLocalDateTime, BoltLocalTime,
    BoltNode, BoltPath, BoltPoint2D, BoltPoint3D, BoltRelationship, BoltTime,
    BoltUnboundRelationship, Structure,
};
pub(crate) use structs::{from_structure, to_structure, Fields};
pub use value::{BoltDict, BoltValue};
