//! Fixed-layout binary codec
//!
//! Consensus payloads, persisted round state and block headers are written in
//! a compact little-endian layout: fixed-width integers, `var_int` length
//! prefixes (`0xfd` = u16, `0xfe` = u32, `0xff` = u64 follows) and
//! length-prefixed byte strings. Every variable-length read takes an upper
//! bound so that a hostile length prefix fails fast instead of allocating.

use crate::{CoreError, CoreResult};
use bytes::{Buf, BufMut, BytesMut};

/// Types with a canonical binary encoding
pub trait Encode {
    /// Append the encoding of `self` to the writer
    fn encode(&self, writer: &mut BinaryWriter);

    /// Encode into a fresh byte vector
    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.encode(&mut writer);
        writer.into_bytes()
    }
}

/// Types that can be read back from their canonical binary encoding
pub trait Decode: Sized {
    /// Read one value from the reader
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self>;

    /// Decode a value that must span the whole input
    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let mut reader = BinaryReader::new(bytes);
        let value = Self::decode(&mut reader)?;
        if !reader.is_empty() {
            return Err(CoreError::Deserialization(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }
        Ok(value)
    }
}

/// Append-only binary writer
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    /// Write raw bytes without a length prefix
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Write a variable-length integer
    pub fn write_var_int(&mut self, value: u64) {
        if value < 0xfd {
            self.buf.put_u8(value as u8);
        } else if value <= u64::from(u16::MAX) {
            self.buf.put_u8(0xfd);
            self.buf.put_u16_le(value as u16);
        } else if value <= u64::from(u32::MAX) {
            self.buf.put_u8(0xfe);
            self.buf.put_u32_le(value as u32);
        } else {
            self.buf.put_u8(0xff);
            self.buf.put_u64_le(value);
        }
    }

    /// Write a length-prefixed byte string
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_var_int(bytes.len() as u64);
        self.buf.put_slice(bytes);
    }

    /// Write a length-prefixed sequence of encodable items
    pub fn write_array<T: Encode>(&mut self, items: &[T]) {
        self.write_var_int(items.len() as u64);
        for item in items {
            item.encode(self);
        }
    }

    /// Write a single encodable item
    pub fn write<T: Encode + ?Sized>(&mut self, item: &T) {
        item.encode(self);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the writer and return the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Cursor over an encoded byte slice
#[derive(Debug)]
pub struct BinaryReader<'a> {
    buf: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    /// Create a reader over the given bytes
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, needed: usize) -> CoreResult<()> {
        if self.buf.remaining() < needed {
            return Err(CoreError::Deserialization(format!(
                "unexpected end of input: need {} bytes, have {}",
                needed,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> CoreResult<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> CoreResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CoreError::Deserialization(format!(
                "invalid boolean byte {other:#04x}"
            ))),
        }
    }

    pub fn read_u16(&mut self) -> CoreResult<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> CoreResult<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self) -> CoreResult<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Read a fixed-size byte array
    pub fn read_array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> CoreResult<Vec<u8>> {
        self.ensure(len)?;
        let out = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(out)
    }

    /// Read a variable-length integer no larger than `max`
    pub fn read_var_int(&mut self, max: u64) -> CoreResult<u64> {
        let value = match self.read_u8()? {
            0xfd => u64::from(self.read_u16()?),
            0xfe => u64::from(self.read_u32()?),
            0xff => self.read_u64()?,
            small => u64::from(small),
        };
        if value > max {
            return Err(CoreError::Deserialization(format!(
                "length {value} exceeds limit {max}"
            )));
        }
        Ok(value)
    }

    /// Read a length-prefixed byte string of at most `max` bytes
    pub fn read_var_bytes(&mut self, max: usize) -> CoreResult<Vec<u8>> {
        let len = self.read_var_int(max as u64)? as usize;
        self.read_bytes(len)
    }

    /// Read a length-prefixed sequence of at most `max` items
    pub fn read_array_of<T: Decode>(&mut self, max: usize) -> CoreResult<Vec<T>> {
        let len = self.read_var_int(max as u64)? as usize;
        let mut items = Vec::with_capacity(len.min(self.buf.remaining()));
        for _ in 0..len {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    /// Read a single decodable item
    pub fn read<T: Decode>(&mut self) -> CoreResult<T> {
        T::decode(self)
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
