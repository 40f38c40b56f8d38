//! Growable byte buffer with a read/write cursor.
//!
//! [`FramedBuffer`] is the substrate both the transport and the record codecs work on.
//! It owns a contiguous byte array, a logical length and a cursor offset, with the
//! invariant `offset <= length <= capacity`. Every typed read is bounds-checked against
//! the logical length; running past it is a hard [`StreamError::BufferUnderrun`], which
//! is distinct from "no data yet" (that is the transport's concern). Writes past the
//! current length extend it and grow the storage, never truncating.
//!
//! ```rust
//! use cgstream::buffer::FramedBuffer;
//!
//! let mut buffer = FramedBuffer::new();
//! buffer.write(&7u32);
//! buffer.write(&String::from("Bob"));
//! buffer.set_offset(0).unwrap();
//!
//! assert_eq!(buffer.read::<u32>().unwrap(), 7);
//! assert_eq!(buffer.read::<String>().unwrap(), "Bob");
//! assert!(buffer.read::<u8>().is_err());
//! ```

use bytes::{Bytes, BytesMut};

use crate::{Result, StreamError};

/// Byte order for primitive encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Fixed-width primitive that can be encoded in either byte order.
pub trait Primitive: Copy {
    /// Encoded width in bytes.
    const SIZE: usize;

    fn decode(bytes: &[u8], order: ByteOrder) -> Self;
    fn encode(self, out: &mut [u8], order: ByteOrder);
}

macro_rules! impl_primitive {
    ($($ty:ty),*) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn decode(bytes: &[u8], order: ByteOrder) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    match order {
                        ByteOrder::Little => <$ty>::from_le_bytes(raw),
                        ByteOrder::Big => <$ty>::from_be_bytes(raw),
                    }
                }

                fn encode(self, out: &mut [u8], order: ByteOrder) {
                    let raw = match order {
                        ByteOrder::Little => self.to_le_bytes(),
                        ByteOrder::Big => self.to_be_bytes(),
                    };
                    out[..Self::SIZE].copy_from_slice(&raw);
                }
            }
        )*
    };
}

impl_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// A value with a wire representation (little-endian framing).
pub trait WireValue: Sized {
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self>;
    fn write_to(&self, buffer: &mut FramedBuffer);
}

macro_rules! impl_wire_primitive {
    ($($ty:ty),*) => {
        $(
            impl WireValue for $ty {
                fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
                    buffer.read_primitive(ByteOrder::Little)
                }

                fn write_to(&self, buffer: &mut FramedBuffer) {
                    buffer.write_primitive(*self, ByteOrder::Little)
                }
            }
        )*
    };
}

impl_wire_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl WireValue for bool {
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
        Ok(buffer.read::<u8>()? != 0)
    }

    fn write_to(&self, buffer: &mut FramedBuffer) {
        buffer.write(&u8::from(*self));
    }
}

impl WireValue for String {
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
        let len = buffer.read::<u32>()? as usize;
        let bytes = buffer.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            StreamError::protocol("string decoding", format!("invalid UTF-8: {}", e))
        })
    }

    fn write_to(&self, buffer: &mut FramedBuffer) {
        buffer.write(&(self.len() as u32));
        buffer.write_bytes(self.as_bytes());
    }
}

/// Length-prefixed opaque blob, copied out once so snapshots can share it cheaply.
impl WireValue for Bytes {
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
        let len = buffer.read::<u32>()? as usize;
        Ok(Bytes::copy_from_slice(buffer.read_bytes(len)?))
    }

    fn write_to(&self, buffer: &mut FramedBuffer) {
        buffer.write(&(self.len() as u32));
        buffer.write_bytes(self);
    }
}

impl<T: WireValue> WireValue for Vec<T> {
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
        let count = buffer.read::<u32>()? as usize;
        // A corrupt count must not drive a huge allocation; each element is at least a byte.
        if count > buffer.remaining() {
            return Err(StreamError::protocol(
                "sequence decoding",
                format!("count {} exceeds {} remaining bytes", count, buffer.remaining()),
            ));
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::read_from(buffer)?);
        }
        Ok(items)
    }

    fn write_to(&self, buffer: &mut FramedBuffer) {
        buffer.write(&(self.len() as u32));
        for item in self {
            item.write_to(buffer);
        }
    }
}

impl<T: WireValue + Copy + Default, const N: usize> WireValue for [T; N] {
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
        let mut out = [T::default(); N];
        for slot in out.iter_mut() {
            *slot = T::read_from(buffer)?;
        }
        Ok(out)
    }

    fn write_to(&self, buffer: &mut FramedBuffer) {
        for item in self {
            item.write_to(buffer);
        }
    }
}

/// Growable byte buffer with a logical length and a read/write offset.
#[derive(Debug, Default, Clone)]
pub struct FramedBuffer {
    data: BytesMut,
    length: usize,
    offset: usize,
}

impl FramedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: BytesMut::with_capacity(capacity), length: 0, offset: 0 }
    }

    /// Buffer holding a copy of `bytes`, cursor at zero.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self { data: BytesMut::from(bytes), length: bytes.len(), offset: 0 }
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Bytes between the cursor and the logical end.
    pub fn remaining(&self) -> usize {
        self.length - self.offset
    }

    /// Set the logical length, growing storage (zero filled) as needed.
    ///
    /// Shrinking below the cursor pulls the cursor back with it.
    pub fn set_length(&mut self, length: usize) {
        self.ensure_storage(length);
        self.length = length;
        self.offset = self.offset.min(length);
    }

    /// Move the cursor; it may not pass the logical length.
    pub fn set_offset(&mut self, offset: usize) -> Result<()> {
        if offset > self.length {
            return Err(StreamError::BufferUnderrun {
                offset,
                requested: 0,
                length: self.length,
            });
        }
        self.offset = offset;
        Ok(())
    }

    /// Reset length and offset to zero, retaining capacity.
    pub fn clear(&mut self) {
        self.length = 0;
        self.offset = 0;
    }

    /// The logical contents, `0..len()`.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Typed little-endian read at the cursor.
    pub fn read<T: WireValue>(&mut self) -> Result<T> {
        T::read_from(self)
    }

    /// Typed little-endian write at the cursor.
    pub fn write<T: WireValue>(&mut self, value: &T) {
        value.write_to(self)
    }

    /// Typed big-endian read at the cursor.
    pub fn read_be<T: Primitive>(&mut self) -> Result<T> {
        self.read_primitive(ByteOrder::Big)
    }

    /// Typed big-endian write at the cursor.
    pub fn write_be<T: Primitive>(&mut self, value: T) {
        self.write_primitive(value, ByteOrder::Big)
    }

    pub fn read_primitive<T: Primitive>(&mut self, order: ByteOrder) -> Result<T> {
        let bytes = self.read_bytes(T::SIZE)?;
        Ok(T::decode(bytes, order))
    }

    pub fn write_primitive<T: Primitive>(&mut self, value: T, order: ByteOrder) {
        let region = self.claim(T::SIZE);
        value.encode(region, order);
    }

    /// Borrow `len` bytes at the cursor and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        let end = self.offset.checked_add(len).filter(|end| *end <= self.length).ok_or(
            StreamError::BufferUnderrun { offset: self.offset, requested: len, length: self.length },
        )?;
        let start = self.offset;
        self.offset = end;
        Ok(&self.data[start..end])
    }

    /// Copy `bytes` in at the cursor, extending the length if needed.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.claim(bytes.len()).copy_from_slice(bytes);
    }

    /// Overwrite a little-endian `u32` at an absolute position without moving the cursor.
    ///
    /// Used to back-fill length fields once a payload has been written.
    pub fn patch_u32(&mut self, at: usize, value: u32) -> Result<()> {
        let end = at + u32::SIZE;
        if end > self.length {
            return Err(StreamError::BufferUnderrun {
                offset: at,
                requested: u32::SIZE,
                length: self.length,
            });
        }
        value.encode(&mut self.data[at..end], ByteOrder::Little);
        Ok(())
    }

    /// Mutable region `start..start + len`, extending the length to cover it.
    ///
    /// The transport reads socket bytes straight into this region.
    pub fn region_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        let end = start + len;
        if end > self.length {
            self.set_length(end);
        }
        &mut self.data[start..end]
    }

    fn claim(&mut self, len: usize) -> &mut [u8] {
        let start = self.offset;
        let end = start + len;
        if end > self.length {
            self.ensure_storage(end);
            self.length = end;
        }
        self.offset = end;
        &mut self.data[start..end]
    }

    fn ensure_storage(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, 0);
        }
    }
}
