//! Marker bytes. Every PackStream value starts with one.

use bytes::{Buf, BufMut};

pub const NULL: u8 = 0xC0;
pub const FLOAT_64: u8 = 0xC1;
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

/// Integer markers with 1, 2, 4 and 8 payload bytes.
pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

/// Integers that fit in the marker byte itself.
pub const TINY_INT: std::ops::RangeInclusive<i64> = -16..=127;

/// Structures only come in the tiny form: `0xB0 | field count`.
pub const TINY_STRUCT: u8 = 0xB0;

/// The sized types: a tiny marker carrying the length in its low nibble
/// when there is one, and three markers followed by a u8, u16 or u32 length.
pub struct Family {
    tiny: Option<u8>,
    sized: [u8; 3],
}

pub const BYTES: Family = Family { tiny: None, sized: [0xCC, 0xCD, 0xCE] };
pub const STRING: Family = Family { tiny: Some(0x80), sized: [0xD0, 0xD1, 0xD2] };
pub const LIST: Family = Family { tiny: Some(0x90), sized: [0xD4, 0xD5, 0xD6] };
pub const DICT: Family = Family { tiny: Some(0xA0), sized: [0xD8, 0xD9, 0xDA] };

/// How a marker of some family says its length.
pub enum Length {
    Inline(usize),
    /// The length follows in this many big-endian bytes.
    Prefixed(usize),
}

impl Family {
    /// Writes the smallest header for `len`.
    pub fn put_header(&self, buf: &mut impl BufMut, len: usize) {
        match (self.tiny, len) {
            (Some(tiny), 0..=15) => buf.put_u8(tiny | len as u8),
            (_, 0..=0xFF) => {
                buf.put_u8(self.sized[0]);
                buf.put_u8(len as u8);
            }
            (_, 0x100..=0xFFFF) => {
                buf.put_u8(self.sized[1]);
                buf.put_u16(len as u16);
            }
            _ => {
                buf.put_u8(self.sized[2]);
                buf.put_u32(len as u32);
            }
        }
    }

    pub fn length(&self, marker: u8) -> Option<Length> {
        if let Some(tiny) = self.tiny {
            if marker & 0xF0 == tiny {
                return Some(Length::Inline(usize::from(marker & 0x0F)));
            }
        }
        let width = self.sized.iter().position(|&m| m == marker)?;
        Some(Length::Prefixed(1 << width))
    }
}

impl Length {
    /// Reads the prefixed length from `buf`, which must hold enough bytes.
    pub fn read(self, buf: &mut impl Buf) -> usize {
        match self {
            Self::Inline(len) => len,
            Self::Prefixed(1) => usize::from(buf.get_u8()),
            Self::Prefixed(2) => usize::from(buf.get_u16()),
            Self::Prefixed(_) => buf.get_u32() as usize,
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::Inline(_) => 0,
            Self::Prefixed(width) => *width,
        }
    }
}
