//! Fixed-width big-endian primitive codec.
//!
//! This is the lowest layer of the persistence stack: a pure, stateless,
//! allocation-light encoder/decoder pair for scalar values and raw byte
//! blobs. Widths are fixed (1/2/2/4/8/n) so that decode offsets can be
//! computed from class shapes alone, without length prefixes in the stream.
//!
//! Decoding past the end of the buffer yields [`HeapError::Underflow`].
//! One caller (graph-image instance discovery) relies on that as a deliberate
//! end-of-sequence sentinel; everyone else treats it as truncation.

use crate::error::{HeapError, Result};

/// Appends primitive values to a growable buffer in big-endian order.
#[derive(Debug, Default)]
pub struct PrimitiveEncoder {
    buffer: Vec<u8>,
}

impl PrimitiveEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Appends a single signed byte.
    pub fn encode_byte(&mut self, value: i8) {
        self.buffer.push(value as u8);
    }

    /// Appends a 16-bit signed integer (2 bytes).
    pub fn encode_short(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a 16-bit unsigned character (2 bytes).
    pub fn encode_char(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a 32-bit signed integer (4 bytes).
    pub fn encode_int(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a 64-bit signed integer (8 bytes).
    pub fn encode_long(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a raw blob, verbatim and unprefixed.
    pub fn encode_bytes(&mut self, value: &[u8]) {
        self.buffer.extend_from_slice(value);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes the encoder and yields the backing buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Reads primitive values from a fixed buffer, advancing an internal cursor
/// by the exact byte width of each type.
#[derive(Debug)]
pub struct PrimitiveDecoder<'a> {
    buffer: &'a [u8],
    cursor: usize,
}

impl<'a> PrimitiveDecoder<'a> {
    /// Creates a decoder positioned at the start of `buffer`.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, cursor: 0 }
    }

    /// Current cursor position in bytes.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Returns true if the cursor has consumed the whole buffer.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.buffer.len()
    }

    fn take(&mut self, width: usize) -> Result<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(width)
            .ok_or(HeapError::Underflow)?;
        if end > self.buffer.len() {
            return Err(HeapError::Underflow);
        }
        let slice = &self.buffer[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    /// Reads a single signed byte.
    pub fn decode_byte(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    /// Reads a 16-bit signed integer.
    pub fn decode_short(&mut self) -> Result<i16> {
        let raw = self.take(2)?;
        Ok(i16::from_be_bytes([raw[0], raw[1]]))
    }

    /// Reads a 16-bit unsigned character.
    pub fn decode_char(&mut self) -> Result<u16> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    /// Reads a 32-bit signed integer.
    pub fn decode_int(&mut self) -> Result<i32> {
        let raw = self.take(4)?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Reads a 64-bit signed integer.
    pub fn decode_long(&mut self) -> Result<i64> {
        let raw = self.take(8)?;
        Ok(i64::from_be_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ]))
    }

    /// Reads `length` raw bytes.
    pub fn decode_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        self.take(length)
    }

    /// Advances the cursor by `width` without materializing a value.
    /// Used by the boundary-discovery pass.
    pub fn skip(&mut self, width: usize) -> Result<()> {
        self.take(width).map(|_| ())
    }
}
