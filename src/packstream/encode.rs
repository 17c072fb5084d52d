use bytes::{BufMut, BytesMut};

use super::marker::{self, Family};
use crate::types::{to_structure, BoltDict, BoltValue};

/// PackStream writing on a byte buffer.
pub trait Pack {
    fn pack(&mut self, value: &BoltValue);

    fn pack_int(&mut self, value: i64);

    fn pack_str(&mut self, value: &str);

    fn pack_list(&mut self, items: &[BoltValue]);

    fn pack_dict(&mut self, dict: &BoltDict);

    /// Starts a structure; its `fields` values must follow.
    fn pack_struct_header(&mut self, tag: u8, fields: usize);
}

impl Pack for BytesMut {
    fn pack(&mut self, value: &BoltValue) {
        match value {
            BoltValue::Null => self.put_u8(marker::NULL),
            BoltValue::Boolean(true) => self.put_u8(marker::TRUE),
            BoltValue::Boolean(false) => self.put_u8(marker::FALSE),
            BoltValue::Integer(i) => self.pack_int(*i),
            BoltValue::Float(f) => {
                self.put_u8(marker::FLOAT_64);
                self.put_f64(*f);
            }
            BoltValue::String(s) => self.pack_str(s),
            BoltValue::Bytes(b) => sized(self, &marker::BYTES, b),
            BoltValue::List(items) => self.pack_list(items),
            BoltValue::Dict(dict) => self.pack_dict(dict),
            structured => {
                if let Some((tag, fields)) = to_structure(structured) {
                    self.pack_struct_header(tag, fields.len());
                    for field in &fields {
                        self.pack(field);
                    }
                }
            }
        }
    }

    fn pack_int(&mut self, value: i64) {
        if marker::TINY_INT.contains(&value) {
            self.put_i8(value as i8);
        } else if let Ok(v) = i8::try_from(value) {
            self.put_u8(marker::INT_8);
            self.put_i8(v);
        } else if let Ok(v) = i16::try_from(value) {
            self.put_u8(marker::INT_16);
            self.put_i16(v);
        } else if let Ok(v) = i32::try_from(value) {
            self.put_u8(marker::INT_32);
            self.put_i32(v);
        } else {
            self.put_u8(marker::INT_64);
            self.put_i64(value);
        }
    }

    fn pack_str(&mut self, value: &str) {
        sized(self, &marker::STRING, value.as_bytes());
    }

    fn pack_list(&mut self, items: &[BoltValue]) {
        marker::LIST.put_header(self, items.len());
        for item in items {
            self.pack(item);
        }
    }

    fn pack_dict(&mut self, dict: &BoltDict) {
        marker::DICT.put_header(self, dict.len());
        for (key, value) in dict {
            self.pack_str(key);
            self.pack(value);
        }
    }

    fn pack_struct_header(&mut self, tag: u8, fields: usize) {
        debug_assert!(fields <= 15, "structures hold at most 15 fields");
        self.put_u8(marker::TINY_STRUCT | fields as u8);
        self.put_u8(tag);
    }
}

fn sized(buf: &mut BytesMut, family: &Family, payload: &[u8]) {
    family.put_header(buf, payload.len());
    buf.put_slice(payload);
}

/// Appends the PackStream form of `value` to `buf`.
pub fn encode_value(buf: &mut BytesMut, value: &BoltValue) {
    buf.pack(value);
}
