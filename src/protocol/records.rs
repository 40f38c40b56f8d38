//! Typed binary records.
//!
//! Each record is a plain struct whose wire form is its fields in declaration order,
//! encoded with [`WireValue`]. The [`Record`] trait binds a struct to its tag.

use bytes::Bytes;
use num_enum::{FromPrimitive, IntoPrimitive};
use std::time::Duration;

use super::tag::{ObjectTag, ObjectTagSet};
use crate::{Result, StreamError};
use crate::buffer::{FramedBuffer, WireValue};

/// A record with a fixed tag.
pub trait Record: WireValue {
    const TAG: ObjectTag;
}

/// Parent id carried by root segments.
pub const NO_PARENT: u32 = u32::MAX;

macro_rules! wire_fields {
    ($name:ident { $($field:ident),* $(,)? }) => {
        impl WireValue for $name {
            fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
                Ok(Self { $($field: buffer.read()?),* })
            }

            fn write_to(&self, buffer: &mut FramedBuffer) {
                $(buffer.write(&self.$field);)*
            }
        }
    };
}

macro_rules! record {
    ($name:ident => $tag:ident { $($field:ident),* $(,)? }) => {
        wire_fields!($name { $($field),* });

        impl Record for $name {
            const TAG: ObjectTag = ObjectTag::$tag;
        }
    };
}

// Control

/// Object kinds the server can produce, or the client is requesting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectEnums {
    pub tags: ObjectTagSet,
}
record!(ObjectEnums => ObjectEnums { tags });

/// Top-level kinds whose values are unchanged since the previous frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contents {
    pub unchanged: ObjectTagSet,
}
record!(Contents => Contents { unchanged });

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ping {
    pub ping_id: u32,
}
record!(Ping => Ping { ping_id });

/// Restricts one object kind to a set of IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterEntry {
    pub tag: ObjectTag,
    pub ids: Vec<u32>,
}
wire_fields!(FilterEntry { tag, ids });

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub entries: Vec<FilterEntry>,
}
record!(Filter => Filter { entries });

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HapticCommand {
    pub device_id: u32,
    pub enabled: bool,
}
wire_fields!(HapticCommand { device_id, enabled });

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HapticFeedback {
    pub commands: Vec<HapticCommand>,
}
record!(HapticFeedback => HapticFeedback { commands });

/// Asks the server for one frame (client-pull stream modes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFrame;

impl WireValue for RequestFrame {
    fn read_from(_buffer: &mut FramedBuffer) -> Result<Self> {
        Ok(RequestFrame)
    }

    fn write_to(&self, _buffer: &mut FramedBuffer) {}
}

impl Record for RequestFrame {
    const TAG: ObjectTag = ObjectTag::RequestFrame;
}

// Static

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamInfo {
    pub frame_rate: f64,
}
record!(StreamInfo => StreamInfo { frame_rate });

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub major: u16,
    pub minor: u16,
    pub point: u16,
    pub revision: u16,
}
record!(ApplicationInfo => ApplicationInfo { major, minor, point, revision });

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraInfo {
    pub camera_id: u32,
    pub name: String,
    pub display_type: String,
    pub width: u32,
    pub height: u32,
}
record!(CameraInfo => CameraInfo { camera_id, name, display_type, width, height });

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub segment_id: u32,
    /// [`NO_PARENT`] for the root segment.
    pub parent_id: u32,
    pub name: String,
}
wire_fields!(SegmentInfo { segment_id, parent_id, name });

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectInfo {
    pub subject_id: u32,
    pub name: String,
    pub segments: Vec<SegmentInfo>,
}
record!(SubjectInfo => SubjectInfo { subject_id, name, segments });

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_id: u32,
    pub name: String,
    pub unit: String,
}
wire_fields!(ChannelInfo { channel_id, name, unit });

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: u32,
    pub name: String,
    pub device_type: u32,
    pub channels: Vec<ChannelInfo>,
}
record!(DeviceInfo => DeviceInfo { device_id, name, device_type, channels });

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForcePlateInfo {
    pub plate_id: u32,
    pub device_id: u32,
    pub corners: [[f64; 3]; 4],
    pub origin: [f64; 3],
}
record!(ForcePlateInfo => ForcePlateInfo { plate_id, device_id, corners, origin });

// Dynamic

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: u32,
}
record!(FrameInfo => FrameInfo { frame_id });

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timecode {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub frames: u32,
    pub sub_frame: u32,
    pub field: bool,
    pub standard: u32,
    pub sub_frames_per_frame: u32,
}
record!(Timecode => Timecode {
    hours,
    minutes,
    seconds,
    frames,
    sub_frame,
    field,
    standard,
    sub_frames_per_frame,
});

#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub name: String,
    pub seconds: f64,
}

impl WireValue for LatencySample {
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
        let name: String = buffer.read()?;
        let seconds: f64 = buffer.read()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(StreamError::protocol(
                "LatencyInfo",
                format!("stage {name:?} reports {seconds} s"),
            ));
        }
        Ok(Self { name, seconds })
    }

    fn write_to(&self, buffer: &mut FramedBuffer) {
        buffer.write(&self.name);
        buffer.write(&self.seconds);
    }
}

/// Server-side processing latency, broken down by pipeline stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyInfo {
    pub samples: Vec<LatencySample>,
}
record!(LatencyInfo => LatencyInfo { samples });

impl LatencyInfo {
    pub fn total_seconds(&self) -> f64 {
        self.samples.iter().map(|sample| sample.seconds).sum()
    }

    /// Saturates at [`Duration::MAX`]; stages that sum past it are not clock time.
    pub fn total(&self) -> Duration {
        Duration::try_from_secs_f64(self.total_seconds().max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// One segment's rigid transform; rotation is a quaternion `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPose {
    pub segment_id: u32,
    pub translation: [f64; 3],
    pub rotation: [f64; 4],
    pub occluded: bool,
}
wire_fields!(SegmentPose { segment_id, translation, rotation, occluded });

/// World-space segment transforms for one subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalSegments {
    pub subject_id: u32,
    pub poses: Vec<SegmentPose>,
}
record!(GlobalSegments => GlobalSegments { subject_id, poses });

/// Parent-relative segment transforms for one subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalSegments {
    pub subject_id: u32,
    pub poses: Vec<SegmentPose>,
}
record!(LocalSegments => LocalSegments { subject_id, poses });

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub position: [f64; 2],
    pub radius: f64,
    pub accuracy: f64,
}
wire_fields!(Centroid { position, radius, accuracy });

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CentroidTracks {
    pub camera_id: u32,
    pub centroids: Vec<Centroid>,
}
record!(CentroidTracks => CentroidTracks { camera_id, centroids });

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceFrame {
    pub device_id: u32,
    pub channel_id: u32,
    pub samples: Vec<f32>,
}
record!(DeviceFrame => DeviceFrame { device_id, channel_id, samples });

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForceFrame {
    pub plate_id: u32,
    pub force: [f64; 3],
    pub moment: [f64; 3],
    pub centre_of_pressure: [f64; 3],
}
record!(ForceFrame => ForceFrame { plate_id, force, moment, centre_of_pressure });

/// Pixel layout of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum VideoFormat {
    Mono8 = 0,
    Bgr8 = 1,
    BayerRggb8 = 2,
    BayerGbrg8 = 3,
    BayerGrbg8 = 4,
    BayerBggr8 = 5,
    #[num_enum(catch_all)]
    Other(u32),
}

impl Default for VideoFormat {
    fn default() -> Self {
        VideoFormat::Mono8
    }
}

impl VideoFormat {
    pub fn is_bayer(self) -> bool {
        matches!(
            self,
            VideoFormat::BayerRggb8
                | VideoFormat::BayerGbrg8
                | VideoFormat::BayerGrbg8
                | VideoFormat::BayerBggr8
        )
    }
}

impl WireValue for VideoFormat {
    fn read_from(buffer: &mut FramedBuffer) -> Result<Self> {
        Ok(VideoFormat::from(buffer.read::<u32>()?))
    }

    fn write_to(&self, buffer: &mut FramedBuffer) {
        buffer.write(&u32::from(*self));
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFrame {
    pub camera_id: u32,
    pub frame_id: u32,
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}
record!(VideoFrame => VideoFrame { camera_id, frame_id, format, width, height, data });

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnlabeledMarkers {
    pub positions: Vec<[f64; 3]>,
}
record!(UnlabeledMarkers => UnlabeledMarkers { positions });
