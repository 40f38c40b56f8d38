//! Nested tag + length framing.
//!
//! A frame is `[u32 tag][u32 length][payload]`, and a top-level `Objects` frame's payload
//! is itself a run of such sub-objects. [`FrameReader`] walks one frame, scoping every
//! sub-object decode to its declared length; [`FrameWriter`] builds one, back-filling the
//! length fields once payloads are written.

use tracing::trace;

use super::records::Record;
use super::tag::{OBJECT_HEADER_SIZE, ObjectTag};
use crate::buffer::FramedBuffer;
use crate::{Result, StreamError};

/// Reads one frame's sub-objects in order.
pub struct FrameReader<'a> {
    buffer: &'a mut FramedBuffer,
    tag: u32,
    end: usize,
}

impl<'a> FrameReader<'a> {
    /// Read the outer tag and length at the buffer's cursor.
    ///
    /// Fails if the declared payload runs past the buffer's logical length.
    pub fn open(buffer: &'a mut FramedBuffer) -> Result<Self> {
        let tag = buffer.read::<u32>()?;
        let length = buffer.read::<u32>()? as usize;
        let end = buffer.offset() + length;
        if end > buffer.len() {
            return Err(StreamError::protocol(
                "frame header",
                format!("declared length {} but only {} bytes present", length, buffer.remaining()),
            ));
        }
        Ok(Self { buffer, tag, end })
    }

    /// Raw outer tag value.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Fail unless the outer tag is `expected`.
    pub fn expect_tag(&self, expected: ObjectTag) -> Result<()> {
        if self.tag != u32::from(expected) {
            return Err(StreamError::protocol(
                "frame header",
                format!("expected {:?} tag, found {}", expected, self.tag),
            ));
        }
        Ok(())
    }

    /// Whether unread sub-objects remain inside the declared length.
    pub fn has_more(&self) -> bool {
        self.buffer.offset() < self.end
    }

    /// Decode the next sub-object.
    ///
    /// `decode` receives the raw tag and the buffer positioned at the payload. Reading
    /// past the sub-object's declared end is a protocol error; bytes it leaves unread are
    /// skipped, so decoders may ignore trailing extensions and unknown tags.
    pub fn next_object<T>(
        &mut self,
        decode: impl FnOnce(u32, &mut FramedBuffer) -> Result<T>,
    ) -> Result<T> {
        if self.end - self.buffer.offset() < OBJECT_HEADER_SIZE {
            return Err(StreamError::protocol(
                "sub-object header",
                format!("{} trailing bytes cannot hold a header", self.end - self.buffer.offset()),
            ));
        }
        let tag = self.buffer.read::<u32>()?;
        let length = self.buffer.read::<u32>()? as usize;
        let start = self.buffer.offset();
        let object_end = start + length;
        if object_end > self.end {
            return Err(StreamError::protocol(
                "sub-object header",
                format!("tag {} declares {} bytes, {} left in frame", tag, length, self.end - start),
            ));
        }

        let value = decode(tag, self.buffer)?;

        if self.buffer.offset() > object_end {
            return Err(StreamError::protocol(
                "sub-object payload",
                format!("tag {} decoded {} bytes past its end", tag, self.buffer.offset() - object_end),
            ));
        }
        if self.buffer.offset() < object_end {
            trace!(tag, skipped = object_end - self.buffer.offset(), "Skipping unread payload");
        }
        self.buffer.set_offset(object_end)?;
        Ok(value)
    }

    /// Decode the next sub-object as `R`, failing if its tag differs.
    pub fn read_record<R: Record>(&mut self) -> Result<R> {
        self.next_object(|tag, buffer| {
            if tag != u32::from(R::TAG) {
                return Err(StreamError::protocol(
                    "sub-object",
                    format!("expected {:?}, found tag {}", R::TAG, tag),
                ));
            }
            buffer.read::<R>()
        })
    }
}

/// Builds one frame into a buffer.
pub struct FrameWriter<'a> {
    buffer: &'a mut FramedBuffer,
    length_at: usize,
}

impl<'a> FrameWriter<'a> {
    /// Write the outer header at the cursor with a placeholder length.
    pub fn open(buffer: &'a mut FramedBuffer, tag: ObjectTag) -> Self {
        buffer.write(&u32::from(tag));
        let length_at = buffer.offset();
        buffer.write(&0u32);
        Self { buffer, length_at }
    }

    pub fn write_record<R: Record>(&mut self, record: &R) {
        self.write_object(u32::from(R::TAG), |buffer| buffer.write(record));
    }

    /// Write a sub-object with an arbitrary raw tag.
    pub fn write_object(&mut self, tag: u32, payload: impl FnOnce(&mut FramedBuffer)) {
        self.buffer.write(&tag);
        let length_at = self.buffer.offset();
        self.buffer.write(&0u32);
        payload(self.buffer);
        let length = self.buffer.offset() - length_at - 4;
        // length_at was written above, so the patch is always in bounds.
        let _ = self.buffer.patch_u32(length_at, length as u32);
    }

    /// Back-fill the outer length; returns the total frame size in bytes.
    pub fn finish(self) -> usize {
        let length = self.buffer.offset() - self.length_at - 4;
        let _ = self.buffer.patch_u32(self.length_at, length as u32);
        self.length_at + 4 + length
    }
}
