//! Tag dispatch: one `Objects` frame in, fresh snapshots out.

use std::time::Instant;
use tracing::{debug, trace};

use super::frame::{FrameReader, FrameWriter};
use super::records::*;
use super::tag::{ObjectTag, ObjectTagSet, TagKind};
use crate::buffer::FramedBuffer;
use crate::snapshot::{DynamicObjects, StaticObjects};
use crate::video::{self, VideoDecoder, VideoHint};
use crate::{Result, StreamError};

/// One decoded sub-object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRecord {
    ObjectEnums(ObjectEnums),
    Contents(Contents),
    Ping(Ping),
    Filter(Filter),
    HapticFeedback(HapticFeedback),
    RequestFrame(RequestFrame),
    StreamInfo(StreamInfo),
    ApplicationInfo(ApplicationInfo),
    CameraInfo(CameraInfo),
    SubjectInfo(SubjectInfo),
    DeviceInfo(DeviceInfo),
    ForcePlateInfo(ForcePlateInfo),
    FrameInfo(FrameInfo),
    Timecode(Timecode),
    LatencyInfo(LatencyInfo),
    GlobalSegments(GlobalSegments),
    LocalSegments(LocalSegments),
    CentroidTracks(CentroidTracks),
    DeviceFrame(DeviceFrame),
    ForceFrame(ForceFrame),
    VideoFrame(VideoFrame),
    UnlabeledMarkers(UnlabeledMarkers),
    /// A tag outside the known catalogue; its payload was skipped.
    Unknown(u32),
}

type DecodeFn = fn(&mut FramedBuffer) -> Result<ObjectRecord>;

macro_rules! object_records {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for ObjectRecord {
                fn from(record: $variant) -> Self {
                    ObjectRecord::$variant(record)
                }
            }
        )*

        /// Decoder per known tag.
        static DECODERS: &[(ObjectTag, DecodeFn)] = &[
            $((ObjectTag::$variant, decode_record::<$variant>)),*
        ];

        impl ObjectRecord {
            pub fn tag(&self) -> Option<ObjectTag> {
                match self {
                    $(ObjectRecord::$variant(_) => Some(ObjectTag::$variant),)*
                    ObjectRecord::Unknown(_) => None,
                }
            }

            /// Append this record as one sub-object of `writer`'s frame.
            pub fn write(&self, writer: &mut FrameWriter<'_>) {
                match self {
                    $(ObjectRecord::$variant(record) => writer.write_record(record),)*
                    ObjectRecord::Unknown(tag) => writer.write_object(*tag, |_| {}),
                }
            }
        }
    };
}

object_records!(
    ObjectEnums,
    Contents,
    Ping,
    Filter,
    HapticFeedback,
    RequestFrame,
    StreamInfo,
    ApplicationInfo,
    CameraInfo,
    SubjectInfo,
    DeviceInfo,
    ForcePlateInfo,
    FrameInfo,
    Timecode,
    LatencyInfo,
    GlobalSegments,
    LocalSegments,
    CentroidTracks,
    DeviceFrame,
    ForceFrame,
    VideoFrame,
    UnlabeledMarkers,
);

fn decode_record<R: Record + Into<ObjectRecord>>(buffer: &mut FramedBuffer) -> Result<ObjectRecord> {
    Ok(buffer.read::<R>()?.into())
}

fn decoder_for(tag: u32) -> Option<DecodeFn> {
    DECODERS.iter().find(|(known, _)| u32::from(*known) == tag).map(|(_, decode)| *decode)
}

/// Decode one sub-object's payload by its raw tag.
pub fn decode_object(tag: u32, buffer: &mut FramedBuffer) -> Result<ObjectRecord> {
    match decoder_for(tag) {
        Some(decode) => decode(buffer),
        None => Ok(ObjectRecord::Unknown(tag)),
    }
}

/// Encode an `Objects` frame holding `records`; returns the frame size in bytes.
pub fn encode_objects(buffer: &mut FramedBuffer, records: &[ObjectRecord]) -> usize {
    let mut writer = FrameWriter::open(buffer, ObjectTag::Objects);
    for record in records {
        record.write(&mut writer);
    }
    writer.finish()
}

/// Inputs to [`decode_frame`] besides the bytes.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    pub previous_static: Option<&'a StaticObjects>,
    pub previous_dynamic: Option<&'a DynamicObjects>,
    pub received_at: Instant,
    pub video_hint: VideoHint,
    pub video_decoder: Option<&'a dyn VideoDecoder>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(received_at: Instant) -> Self {
        Self {
            previous_static: None,
            previous_dynamic: None,
            received_at,
            video_hint: VideoHint::PassThrough,
            video_decoder: None,
        }
    }
}

/// Everything one frame produced.
///
/// A snapshot is `None` when the frame carried no tags of that kind, meaning "no change".
#[derive(Debug, Default)]
pub struct DecodedFrame {
    pub static_objects: Option<StaticObjects>,
    pub dynamic_objects: Option<DynamicObjects>,
    pub ping_replies: Vec<u32>,
    /// A mid-stream update to the server's supported set.
    pub object_enums: Option<ObjectTagSet>,
}

/// Decode a complete `Objects` frame at the buffer's cursor.
///
/// Any malformed sub-object fails the whole frame; nothing partial is returned.
pub fn decode_frame(buffer: &mut FramedBuffer, context: DecodeContext<'_>) -> Result<DecodedFrame> {
    let mut reader = FrameReader::open(buffer)?;
    reader.expect_tag(ObjectTag::Objects)?;

    let mut decoded = DecodedFrame::default();
    let mut unchanged = ObjectTagSet::new();
    let mut objects = 0usize;

    while reader.has_more() {
        let record = reader.next_object(decode_object)?;
        objects += 1;
        match record {
            ObjectRecord::Contents(contents) => unchanged.extend(contents.unchanged.iter()),
            ObjectRecord::Ping(ping) => decoded.ping_replies.push(ping.ping_id),
            ObjectRecord::ObjectEnums(enums) => decoded.object_enums = Some(enums.tags),
            other @ (ObjectRecord::Filter(_)
            | ObjectRecord::HapticFeedback(_)
            | ObjectRecord::RequestFrame(_)) => {
                debug!(tag = ?other.tag(), "Ignoring client-bound control object from server")
            }
            ObjectRecord::Unknown(tag) => trace!(tag, "Skipped unknown object"),
            record => store(&mut decoded, record, &context),
        }
    }

    if let (Some(current), Some(previous)) = (decoded.static_objects.as_mut(), context.previous_static) {
        for tag in unchanged.iter().filter(|t| t.kind() == TagKind::Static) {
            current.carry_forward(previous, tag);
        }
    }
    if let (Some(current), Some(previous)) = (decoded.dynamic_objects.as_mut(), context.previous_dynamic)
    {
        for tag in unchanged.iter().filter(|t| t.kind() == TagKind::Dynamic) {
            current.carry_forward(previous, tag);
        }
    }
    if let Some(statics) = decoded.static_objects.as_mut() {
        statics.build_indices();
    }

    trace!(
        objects,
        unchanged = unchanged.len(),
        has_static = decoded.static_objects.is_some(),
        has_dynamic = decoded.dynamic_objects.is_some(),
        "Decoded frame"
    );
    Ok(decoded)
}

fn statics(decoded: &mut DecodedFrame) -> &mut StaticObjects {
    decoded.static_objects.get_or_insert_with(StaticObjects::default)
}

fn dynamics(decoded: &mut DecodedFrame, received_at: Instant) -> &mut DynamicObjects {
    decoded.dynamic_objects.get_or_insert_with(|| DynamicObjects::new(received_at))
}

fn store(decoded: &mut DecodedFrame, record: ObjectRecord, context: &DecodeContext<'_>) {
    let at = context.received_at;
    match record {
        ObjectRecord::StreamInfo(r) => statics(decoded).stream_info = Some(r),
        ObjectRecord::ApplicationInfo(r) => statics(decoded).application_info = Some(r),
        ObjectRecord::CameraInfo(r) => statics(decoded).cameras.push(r),
        ObjectRecord::SubjectInfo(r) => statics(decoded).subjects.push(r),
        ObjectRecord::DeviceInfo(r) => statics(decoded).devices.push(r),
        ObjectRecord::ForcePlateInfo(r) => statics(decoded).force_plates.push(r),

        ObjectRecord::FrameInfo(r) => dynamics(decoded, at).frame_info = Some(r),
        ObjectRecord::Timecode(r) => dynamics(decoded, at).timecode = Some(r),
        ObjectRecord::LatencyInfo(r) => dynamics(decoded, at).latency = Some(r),
        ObjectRecord::GlobalSegments(r) => dynamics(decoded, at).global_segments.push(r),
        ObjectRecord::LocalSegments(r) => dynamics(decoded, at).local_segments.push(r),
        ObjectRecord::CentroidTracks(r) => dynamics(decoded, at).centroids.push(r),
        ObjectRecord::DeviceFrame(r) => dynamics(decoded, at).device_frames.push(r),
        ObjectRecord::ForceFrame(r) => dynamics(decoded, at).force_frames.push(r),
        ObjectRecord::VideoFrame(mut r) => {
            video::apply(context.video_hint, context.video_decoder, &mut r);
            dynamics(decoded, at).video_frames.push(r)
        }
        ObjectRecord::UnlabeledMarkers(r) => dynamics(decoded, at).unlabeled_markers = Some(r),

        // Control records are consumed by the dispatch loop.
        _ => {}
    }
}

/// Decode the handshake frame: exactly one `ObjectEnums` sub-object.
pub fn read_object_enums(buffer: &mut FramedBuffer) -> Result<ObjectTagSet> {
    let mut reader = FrameReader::open(buffer)?;
    reader.expect_tag(ObjectTag::Objects)?;
    if !reader.has_more() {
        return Err(StreamError::protocol("handshake", "empty frame, expected ObjectEnums"));
    }
    let enums: ObjectEnums = reader.read_record()?;
    if reader.has_more() {
        return Err(StreamError::protocol("handshake", "unexpected objects after ObjectEnums"));
    }
    Ok(enums.tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn encoded(records: &[ObjectRecord]) -> FramedBuffer {
        let mut buffer = FramedBuffer::new();
        encode_objects(&mut buffer, records);
        buffer.set_offset(0).unwrap();
        buffer
    }

    fn bob() -> ObjectRecord {
        SubjectInfo {
            subject_id: 1,
            name: "Bob".into(),
            segments: vec![SegmentInfo { segment_id: 0, parent_id: NO_PARENT, name: "Root".into() }],
        }
        .into()
    }

    fn pose(x: f64) -> ObjectRecord {
        GlobalSegments {
            subject_id: 1,
            poses: vec![SegmentPose {
                segment_id: 0,
                translation: [x, 0.0, 0.0],
                rotation: [0.0, 0.0, 0.0, 1.0],
                occluded: false,
            }],
        }
        .into()
    }

    #[test]
    fn lookup_table_covers_every_record_tag() {
        for tag in ObjectTag::STATIC.iter().chain(ObjectTag::DYNAMIC.iter()) {
            assert!(decoder_for(u32::from(*tag)).is_some(), "{:?} has no decoder", tag);
        }
        assert!(decoder_for(u32::from(ObjectTag::Objects)).is_none());
    }

    #[test]
    fn snapshots_are_allocated_lazily() {
        let mut buffer = encoded(&[FrameInfo { frame_id: 5 }.into()]);
        let decoded = decode_frame(&mut buffer, DecodeContext::new(Instant::now())).unwrap();
        assert!(decoded.static_objects.is_none());
        assert_eq!(decoded.dynamic_objects.unwrap().frame_number(), Some(5));

        let mut buffer = encoded(&[bob()]);
        let decoded = decode_frame(&mut buffer, DecodeContext::new(Instant::now())).unwrap();
        assert!(decoded.dynamic_objects.is_none());
        let statics = decoded.static_objects.unwrap();
        assert_eq!(statics.subject("Bob").map(|s| s.subject_id), Some(1));
    }

    #[test]
    fn multi_instance_records_append() {
        let mut buffer = encoded(&[
            CentroidTracks { camera_id: 1, centroids: vec![] }.into(),
            CentroidTracks { camera_id: 2, centroids: vec![] }.into(),
            FrameInfo { frame_id: 1 }.into(),
            FrameInfo { frame_id: 2 }.into(),
        ]);
        let dynamics =
            decode_frame(&mut buffer, DecodeContext::new(Instant::now())).unwrap().dynamic_objects.unwrap();
        assert_eq!(dynamics.centroids.len(), 2);
        // Single-instance kinds keep the last value.
        assert_eq!(dynamics.frame_number(), Some(2));
    }

    #[test]
    fn unchanged_fields_are_carried_forward() {
        let mut first = encoded(&[bob(), FrameInfo { frame_id: 1 }.into(), pose(3.0)]);
        let first = decode_frame(&mut first, DecodeContext::new(Instant::now())).unwrap();
        let previous_static = first.static_objects.unwrap();
        let previous_dynamic = first.dynamic_objects.unwrap();

        let unchanged: ObjectTagSet =
            [ObjectTag::GlobalSegments, ObjectTag::SubjectInfo].into_iter().collect();
        let mut second = encoded(&[
            Contents { unchanged }.into(),
            StreamInfo { frame_rate: 100.0 }.into(),
            FrameInfo { frame_id: 2 }.into(),
        ]);
        let context = DecodeContext {
            previous_static: Some(&previous_static),
            previous_dynamic: Some(&previous_dynamic),
            ..DecodeContext::new(Instant::now())
        };
        let second = decode_frame(&mut second, context).unwrap();

        let dynamics = second.dynamic_objects.unwrap();
        assert_eq!(dynamics.frame_number(), Some(2));
        assert_eq!(dynamics.global_segments, previous_dynamic.global_segments);

        let statics = second.static_objects.unwrap();
        assert_eq!(statics.frame_rate(), Some(100.0));
        // Indices are rebuilt over the carried subjects.
        assert!(statics.subject("Bob").is_some());
    }

    #[test]
    fn carry_forward_without_previous_is_a_no_op() {
        let unchanged: ObjectTagSet = [ObjectTag::GlobalSegments].into_iter().collect();
        let mut buffer = encoded(&[Contents { unchanged }.into(), FrameInfo { frame_id: 2 }.into()]);
        let dynamics =
            decode_frame(&mut buffer, DecodeContext::new(Instant::now())).unwrap().dynamic_objects.unwrap();
        assert!(dynamics.global_segments.is_empty());
    }

    #[test]
    fn pings_and_enums_are_not_snapshot_fields() {
        let tags: ObjectTagSet = [ObjectTag::FrameInfo].into_iter().collect();
        let mut buffer = encoded(&[Ping { ping_id: 4 }.into(), ObjectEnums { tags: tags.clone() }.into()]);
        let decoded = decode_frame(&mut buffer, DecodeContext::new(Instant::now())).unwrap();
        assert_eq!(decoded.ping_replies, vec![4]);
        assert_eq!(decoded.object_enums, Some(tags));
        assert!(decoded.static_objects.is_none());
        assert!(decoded.dynamic_objects.is_none());
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut buffer = FramedBuffer::new();
        let mut writer = FrameWriter::open(&mut buffer, ObjectTag::Objects);
        writer.write_object(500, |b| b.write_bytes(&[0xAA; 12]));
        writer.write_record(&FrameInfo { frame_id: 8 });
        writer.finish();
        buffer.set_offset(0).unwrap();

        let decoded = decode_frame(&mut buffer, DecodeContext::new(Instant::now())).unwrap();
        assert_eq!(decoded.dynamic_objects.unwrap().frame_number(), Some(8));
    }

    #[test]
    fn wrong_outer_tag_fails() {
        let mut buffer = FramedBuffer::new();
        let writer = FrameWriter::open(&mut buffer, ObjectTag::Ping);
        writer.finish();
        buffer.set_offset(0).unwrap();
        assert!(decode_frame(&mut buffer, DecodeContext::new(Instant::now())).is_err());
    }

    #[test]
    fn handshake_requires_exactly_object_enums() {
        let tags: ObjectTagSet = [ObjectTag::SubjectInfo].into_iter().collect();
        let mut ok = encoded(&[ObjectEnums { tags: tags.clone() }.into()]);
        assert_eq!(read_object_enums(&mut ok).unwrap(), tags);

        let mut extra = encoded(&[ObjectEnums { tags }.into(), FrameInfo { frame_id: 1 }.into()]);
        assert!(read_object_enums(&mut extra).is_err());

        let mut wrong = encoded(&[FrameInfo { frame_id: 1 }.into()]);
        assert!(read_object_enums(&mut wrong).is_err());

        let mut empty = encoded(&[]);
        assert!(read_object_enums(&mut empty).is_err());
    }

    #[test]
    fn video_hint_is_applied_during_dispatch() {
        struct Gray;
        impl VideoDecoder for Gray {
            fn decode(&self, _: VideoFormat, _: u32, _: u32, raw: &[u8]) -> Option<Bytes> {
                Some(Bytes::from(raw.repeat(3)))
            }
        }

        let mut buffer = encoded(&[VideoFrame {
            camera_id: 1,
            format: VideoFormat::BayerBggr8,
            width: 1,
            height: 1,
            data: Bytes::from_static(&[7]),
            ..Default::default()
        }
        .into()]);
        let context = DecodeContext {
            video_hint: VideoHint::Decode,
            video_decoder: Some(&Gray),
            ..DecodeContext::new(Instant::now())
        };
        let dynamics = decode_frame(&mut buffer, context).unwrap().dynamic_objects.unwrap();
        assert_eq!(dynamics.video_frames[0].format, VideoFormat::Bgr8);
        assert_eq!(&dynamics.video_frames[0].data[..], &[7, 7, 7]);
    }

    proptest! {
        #[test]
        fn truncated_frames_never_decode(cut in 1usize..64) {
            let full = encoded(&[bob(), FrameInfo { frame_id: 1 }.into(), pose(1.5)]);
            let cut = cut.min(full.len() - 1);
            let mut truncated = FramedBuffer::from_slice(&full.as_slice()[..full.len() - cut]);
            prop_assert!(decode_frame(&mut truncated, DecodeContext::new(Instant::now())).is_err());
        }
    }
}
