use bytes::Buf;

use super::marker::{self, Length};
use crate::error::GraphError;
use crate::types::{from_structure, BoltDict, BoltValue};

/// Reads PackStream values off a buffer.
pub struct Unpacker<'b, B> {
    buf: &'b mut B,
}

impl<'b, B: Buf> Unpacker<'b, B> {
    pub fn new(buf: &'b mut B) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), GraphError> {
        if self.buf.remaining() < n {
            return Err(GraphError::Protocol(format!(
                "truncated value: {n} bytes needed, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn byte(&mut self) -> Result<u8, GraphError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn length(&mut self, length: Length) -> Result<usize, GraphError> {
        self.need(length.width())?;
        Ok(length.read(&mut *self.buf))
    }

    fn payload(&mut self, len: usize) -> Result<Vec<u8>, GraphError> {
        self.need(len)?;
        let mut out = vec![0; len];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// The tag and field count of the structure that must come next.
    pub fn struct_header(&mut self) -> Result<(u8, usize), GraphError> {
        let m = self.byte()?;
        if m & 0xF0 != marker::TINY_STRUCT {
            return Err(GraphError::Protocol(format!("expected a structure, found marker 0x{m:02X}")));
        }
        Ok((self.byte()?, usize::from(m & 0x0F)))
    }

    pub fn values(&mut self, count: usize) -> Result<Vec<BoltValue>, GraphError> {
        (0..count).map(|_| self.value()).collect()
    }

    pub fn value(&mut self) -> Result<BoltValue, GraphError> {
        let m = self.byte()?;
        let value = match m {
            marker::NULL => BoltValue::Null,
            marker::TRUE => BoltValue::Boolean(true),
            marker::FALSE => BoltValue::Boolean(false),
            marker::FLOAT_64 => {
                self.need(8)?;
                BoltValue::Float(self.buf.get_f64())
            }
            0x00..=0x7F | 0xF0..=0xFF => BoltValue::Integer(i64::from(m as i8)),
            marker::INT_8 => {
                self.need(1)?;
                BoltValue::Integer(i64::from(self.buf.get_i8()))
            }
            marker::INT_16 => {
                self.need(2)?;
                BoltValue::Integer(i64::from(self.buf.get_i16()))
            }
            marker::INT_32 => {
                self.need(4)?;
                BoltValue::Integer(i64::from(self.buf.get_i32()))
            }
            marker::INT_64 => {
                self.need(8)?;
                BoltValue::Integer(self.buf.get_i64())
            }
            m if m & 0xF0 == marker::TINY_STRUCT => {
                let tag = self.byte()?;
                let fields = self.values(usize::from(m & 0x0F))?;
                from_structure(tag, fields)?
            }
            m => self.sized(m)?,
        };
        Ok(value)
    }

    fn sized(&mut self, m: u8) -> Result<BoltValue, GraphError> {
        if let Some(length) = marker::BYTES.length(m) {
            let len = self.length(length)?;
            return Ok(BoltValue::Bytes(self.payload(len)?));
        }
        if let Some(length) = marker::STRING.length(m) {
            let len = self.length(length)?;
            let raw = self.payload(len)?;
            return String::from_utf8(raw)
                .map(BoltValue::String)
                .map_err(|e| GraphError::Protocol(format!("string is not UTF-8: {e}")));
        }
        if let Some(length) = marker::LIST.length(m) {
            let len = self.length(length)?;
            return self.values(len).map(BoltValue::List);
        }
        if let Some(length) = marker::DICT.length(m) {
            let len = self.length(length)?;
            let mut dict = BoltDict::with_capacity(len.min(1024));
            for _ in 0..len {
                let key = match self.value()? {
                    BoltValue::String(key) => key,
                    other => {
                        return Err(GraphError::Protocol(format!(
                            "dict key must be a string, got {other}"
                        )))
                    }
                };
                let value = self.value()?;
                dict.insert(key, value);
            }
            return Ok(BoltValue::Dict(dict));
        }
        Err(GraphError::Protocol(format!("unknown marker 0x{m:02X}")))
    }
}

/// Reads one value from the front of `buf`.
pub fn decode_value(buf: &mut impl Buf) -> Result<BoltValue, GraphError> {
    Unpacker::new(buf).value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packstream::encode::encode_value;
    use crate::types::{
        BoltDate, BoltDuration, BoltNode, BoltPath, BoltPoint2D, BoltUnboundRelationship,
    };
    use bytes::BytesMut;

    fn decode_bytes(mut bytes: &[u8]) -> Result<BoltValue, GraphError> {
        decode_value(&mut bytes)
    }

    #[test]
    fn decodes_tiny_and_sized_integers() {
        assert_eq!(decode_bytes(&[0x2A]).unwrap(), BoltValue::Integer(42));
        assert_eq!(decode_bytes(&[0xFF]).unwrap(), BoltValue::Integer(-1));
        assert_eq!(
            decode_bytes(&[marker::INT_16, 0x01, 0x00]).unwrap(),
            BoltValue::Integer(256)
        );
    }

    #[test]
    fn truncated_input_is_a_protocol_error() {
        let err = decode_bytes(&[marker::INT_32, 0x00]).unwrap_err();
        assert!(matches!(err, GraphError::Protocol(_)));
        assert!(decode_bytes(&[]).is_err());
        // STRING_8 promising five bytes, carrying two.
        assert!(decode_bytes(&[0xD0, 0x05, b'a', b'b']).is_err());
    }

    #[test]
    fn dict_keys_must_be_strings() {
        let err = decode_bytes(&[0xA1, 0x01, 0x01]).unwrap_err();
        assert!(err.to_string().contains("dict key must be a string"));
    }

    #[test]
    fn reserved_markers_are_rejected() {
        let err = decode_bytes(&[0xE0]).unwrap_err();
        assert!(err.to_string().contains("unknown marker 0xE0"));
    }

    #[test]
    fn unknown_structure_is_preserved() {
        let value = decode_bytes(&[0xB1, 0x7A, marker::TRUE]).unwrap();
        assert_eq!(
            value,
            BoltValue::Structure {
                tag: 0x7A,
                fields: vec![BoltValue::Boolean(true)],
            }
        );
    }

    #[test]
    fn bolt4_node_has_no_element_id_field() {
        let value = decode_bytes(&[0xB3, 0x4E, 0x07, 0x90, 0xA0]).unwrap();
        let BoltValue::Node(node) = &value else {
            panic!("expected a node, got {value}");
        };
        assert_eq!((node.id, node.element_id.as_str()), (7, "7"));
        assert!(node.labels.is_empty());
    }

    #[test]
    fn path_structure_decodes_indices() {
        let node = |id: i64| BoltNode {
            id,
            labels: vec!["Person".into()],
            properties: BoltDict::new(),
            element_id: id.to_string(),
        };
        let path = BoltValue::Path(BoltPath {
            nodes: vec![node(1), node(2)],
            rels: vec![BoltUnboundRelationship {
                id: 9,
                rel_type: "KNOWS".into(),
                properties: BoltDict::new(),
                element_id: "9".into(),
            }],
            indices: vec![1, 1],
        });
        let mut buf = BytesMut::new();
        encode_value(&mut buf, &path);
        assert_eq!(decode_bytes(&buf).unwrap(), path);
    }

    #[test]
    fn temporal_and_spatial_values_survive_the_codec() {
        for value in [
            BoltValue::Date(BoltDate { days: 19000 }),
            BoltValue::Duration(BoltDuration {
                months: 12,
                days: 30,
                seconds: 3600,
                nanoseconds: 500,
            }),
            BoltValue::Point2D(BoltPoint2D {
                srid: 4326,
                x: 12.5,
                y: 55.7,
            }),
        ] {
            let mut buf = BytesMut::new();
            encode_value(&mut buf, &value);
            assert_eq!(decode_bytes(&buf).unwrap(), value);
        }
    }
}
