//! Object tag space.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::Result;
use crate::buffer::{FramedBuffer, WireValue};

/// Width of a tag plus length prefix on the wire.
pub const OBJECT_HEADER_SIZE: usize = 8;

/// Every record kind the client understands.
///
/// Values outside this enumeration may still appear on the wire; the decoder skips them
/// by their declared length.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u32)]
pub enum ObjectTag {
    Objects = 1,
    ObjectEnums = 2,
    Contents = 3,
    Ping = 4,
    Filter = 5,
    HapticFeedback = 6,
    RequestFrame = 7,

    StreamInfo = 16,
    ApplicationInfo = 17,
    CameraInfo = 18,
    SubjectInfo = 19,
    DeviceInfo = 20,
    ForcePlateInfo = 21,

    FrameInfo = 32,
    Timecode = 33,
    LatencyInfo = 34,
    GlobalSegments = 35,
    LocalSegments = 36,
    CentroidTracks = 37,
    DeviceFrame = 38,
    ForceFrame = 39,
    VideoFrame = 40,
    UnlabeledMarkers = 41,
}

/// Which snapshot a tag's records land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Framing and negotiation; never stored in a snapshot.
    Control,
    /// Rarely changing session data.
    Static,
    /// Per-frame data.
    Dynamic,
}

impl ObjectTag {
    pub const STATIC: [ObjectTag; 6] = [
        ObjectTag::StreamInfo,
        ObjectTag::ApplicationInfo,
        ObjectTag::CameraInfo,
        ObjectTag::SubjectInfo,
        ObjectTag::DeviceInfo,
        ObjectTag::ForcePlateInfo,
    ];

    pub const DYNAMIC: [ObjectTag; 10] = [
        ObjectTag::FrameInfo,
        ObjectTag::Timecode,
        ObjectTag::LatencyInfo,
        ObjectTag::GlobalSegments,
        ObjectTag::LocalSegments,
        ObjectTag::CentroidTracks,
        ObjectTag::DeviceFrame,
        ObjectTag::ForceFrame,
        ObjectTag::VideoFrame,
        ObjectTag::UnlabeledMarkers,
    ];

    pub fn kind(self) -> TagKind {
        if Self::STATIC.contains(&self) {
            TagKind::Static
        } else if Self::DYNAMIC.contains(&self) {
            TagKind::Dynamic
        } else {
            TagKind::Control
        }
    }

    /// Whether several records of this kind may appear in one frame.
    pub fn is_multi_instance(self) -> bool {
        matches!(
            self,
            ObjectTag::CameraInfo
                | ObjectTag::SubjectInfo
                | ObjectTag::DeviceInfo
                | ObjectTag::ForcePlateInfo
                | ObjectTag::GlobalSegments
                | ObjectTag::LocalSegments
                | ObjectTag::CentroidTracks
                | ObjectTag::DeviceFrame
                | ObjectTag::ForceFrame
                | ObjectTag::VideoFrame
        )
    }
}

impl WireValue for ObjectTag {
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
        let raw = buffer.read::<u32>()?;
        ObjectTag::try_from(raw).map_err(|_| {
            crate::StreamError::protocol("tag decoding", format!("unknown object tag {}", raw))
        })
    }

    fn write_to(&self, buffer: &mut FramedBuffer) {
        buffer.write(&u32::from(*self));
    }
}

/// Ordered set of object tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTagSet(BTreeSet<ObjectTag>);

impl ObjectTagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: ObjectTag) -> bool {
        self.0.insert(tag)
    }

    pub fn remove(&mut self, tag: ObjectTag) -> bool {
        self.0.remove(&tag)
    }

    pub fn contains(&self, tag: ObjectTag) -> bool {
        self.0.contains(&tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjectTag> + '_ {
        self.0.iter().copied()
    }

    pub fn intersection(&self, other: &ObjectTagSet) -> ObjectTagSet {
        ObjectTagSet(self.0.intersection(&other.0).copied().collect())
    }
}

impl FromIterator<ObjectTag> for ObjectTagSet {
    fn from_iter<I: IntoIterator<Item = ObjectTag>>(iter: I) -> Self {
        ObjectTagSet(iter.into_iter().collect())
    }
}

impl Extend<ObjectTag> for ObjectTagSet {
    fn extend<I: IntoIterator<Item = ObjectTag>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl WireValue for ObjectTagSet {
    /// Tags this client does not know are dropped rather than failing the frame.
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
        let raw = buffer.read::<Vec<u32>>()?;
        Ok(raw.into_iter().filter_map(|value| ObjectTag::try_from(value).ok()).collect())
    }

    fn write_to(&self, buffer: &mut FramedBuffer) {
        let raw: Vec<u32> = self.iter().map(u32::from).collect();
        buffer.write(&raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_partition_the_tag_space() {
        assert_eq!(ObjectTag::Objects.kind(), TagKind::Control);
        assert_eq!(ObjectTag::Contents.kind(), TagKind::Control);
        assert_eq!(ObjectTag::SubjectInfo.kind(), TagKind::Static);
        assert_eq!(ObjectTag::FrameInfo.kind(), TagKind::Dynamic);
        for tag in ObjectTag::STATIC {
            assert!(!ObjectTag::DYNAMIC.contains(&tag));
        }
    }

    #[test]
    fn unknown_tags_are_dropped_from_sets() {
        let mut buffer = FramedBuffer::new();
        buffer.write(&vec![19u32, 9999, 32]);
        buffer.set_offset(0).unwrap();

        let set = buffer.read::<ObjectTagSet>().unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(ObjectTag::SubjectInfo));
        assert!(set.contains(ObjectTag::FrameInfo));
    }

    #[test]
    fn intersection_keeps_common_tags() {
        let wanted: ObjectTagSet =
            [ObjectTag::FrameInfo, ObjectTag::GlobalSegments, ObjectTag::VideoFrame]
                .into_iter()
                .collect();
        let supported: ObjectTagSet =
            [ObjectTag::FrameInfo, ObjectTag::GlobalSegments].into_iter().collect();
        let requested = wanted.intersection(&supported);
        assert_eq!(requested.len(), 2);
        assert!(!requested.contains(ObjectTag::VideoFrame));
    }
}
