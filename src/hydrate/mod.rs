//! Hydration of wire values into typed, identity-stable values.

mod cache;
mod entity;
mod hydrator;
mod value;

pub use cache::EntityCache;
pub use entity::{Node, Path, Relationship, Subgraph};
pub use hydrator::{Bindings, Hydrator};
pub(crate) use value::map_to_bolt;
pub use value::{Params, Value};
