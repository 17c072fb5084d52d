//! Bolt framing: each message travels as u16-length-prefixed chunks closed
//! by an empty chunk.

pub mod reader;
pub mod writer;

pub use reader::ChunkReader;
pub use writer::ChunkWriter;
