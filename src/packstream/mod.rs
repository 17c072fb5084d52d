//! PackStream, the big-endian binary value format under Bolt messages.

pub mod decode;
pub mod encode;
pub mod marker;

pub use decode::{decode_value, Unpacker};
pub use encode::{encode_value, Pack};
