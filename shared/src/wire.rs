//! Big-endian primitives shared by the message codec.
//!
//! Readers never panic on short input: every read reports `None` once the
//! slice is exhausted. Writers work on a caller-provided slice and report
//! [`EncodeError::BufferTooSmall`] instead of indexing past its end.

use crate::protocol::EncodeError;

/// Number of fractional bits in the fixed-point encoding of coordinates.
pub const FIXED_FRACTION_BITS: u32 = 6;

const FIXED_SCALE: f64 = (1u32 << FIXED_FRACTION_BITS) as f64;

/// Converts a coordinate to its wire representation (value x 64, truncated
/// toward zero).
///
/// Rust float-to-int casts saturate, so negative inputs and NaN encode as 0
/// and anything at or above 2^26 encodes as `u32::MAX`.
pub fn to_fixed(value: f32) -> u32 {
    (value as f64 * FIXED_SCALE) as u32
}

/// Converts a wire fixed-point value back into a coordinate.
pub fn from_fixed(raw: u32) -> f32 {
    (raw as f64 / FIXED_SCALE) as f32
}

#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let value = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(value)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        let bytes = self.read_array::<2>()?;
        Some(u16::from_be_bytes(bytes))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.read_array::<4>()?;
        Some(u32::from_be_bytes(bytes))
    }

    pub fn read_fixed(&mut self) -> Option<f32> {
        self.read_u32().map(from_fixed)
    }

    pub fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let start = self.pos;
        self.pos += len;
        Some(&self.data[start..start + len])
    }

    /// Reads a u8-length-prefixed string slice without copying it.
    pub fn read_short_str(&mut self) -> Option<&'a [u8]> {
        let len = self.read_u8()? as usize;
        self.read_bytes(len)
    }
}

#[derive(Debug)]
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.put_bytes(&[value])
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.put_bytes(&value.to_be_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), EncodeError> {
        self.put_bytes(&value.to_be_bytes())
    }

    pub fn put_fixed(&mut self, value: f32) -> Result<(), EncodeError> {
        self.put_u32(to_fixed(value))
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let available = self.buf.len();
        let end = self.pos + bytes.len();
        let slot = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(EncodeError::BufferTooSmall {
                needed: end,
                available,
            })?;
        slot.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// Writes a u8-length-prefixed string. The caller has already checked
    /// that it fits in 255 bytes.
    pub fn put_short_str(&mut self, value: &str) -> Result<(), EncodeError> {
        self.put_u8(value.len() as u8)?;
        self.put_bytes(value.as_bytes())
    }
}
