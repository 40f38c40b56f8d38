//! Wire protocol: tags, typed records, framing and dispatch.
//!
//! Everything here is synchronous and operates on a [`FramedBuffer`](crate::buffer::FramedBuffer);
//! sockets live in [`crate::transport`].

pub mod dispatch;
pub mod frame;
pub mod records;
pub mod tag;

pub use dispatch::{
    DecodeContext, DecodedFrame, ObjectRecord, decode_frame, decode_object, encode_objects,
    read_object_enums,
};
pub use frame::{FrameReader, FrameWriter};
pub use records::Record;
pub use tag::{OBJECT_HEADER_SIZE, ObjectTag, ObjectTagSet, TagKind};
