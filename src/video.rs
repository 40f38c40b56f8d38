//! Optional video decoding during dispatch.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::protocol::records::{VideoFormat, VideoFrame};

/// What dispatch does with raw camera images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoHint {
    /// Publish frames exactly as received.
    #[default]
    PassThrough,
    /// Run Bayer frames through the installed [`VideoDecoder`], publishing BGR.
    Decode,
}

/// Converts a raw Bayer image into packed 8-bit BGR.
///
/// Called on the pump task, so implementations should be quick.
pub trait VideoDecoder: Send + Sync + 'static {
    /// Returns `None` if the image cannot be decoded; the raw frame is kept in that case.
    fn decode(&self, format: VideoFormat, width: u32, height: u32, raw: &[u8]) -> Option<Bytes>;
}

/// Applies the hint to one frame in place.
pub(crate) fn apply(hint: VideoHint, decoder: Option<&dyn VideoDecoder>, frame: &mut VideoFrame) {
    let (VideoHint::Decode, Some(decoder)) = (hint, decoder) else {
        return;
    };
    if !frame.format.is_bayer() {
        return;
    }
    match decoder.decode(frame.format, frame.width, frame.height, &frame.data) {
        Some(bgr) => {
            frame.data = bgr;
            frame.format = VideoFormat::Bgr8;
        }
        None => {
            tracing::debug!(camera = frame.camera_id, "Video decoder declined frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Expand;

    impl VideoDecoder for Expand {
        fn decode(&self, _: VideoFormat, width: u32, height: u32, raw: &[u8]) -> Option<Bytes> {
            (raw.len() == (width * height) as usize)
                .then(|| raw.iter().flat_map(|p| [*p, *p, *p]).collect::<Vec<u8>>().into())
        }
    }

    fn bayer() -> VideoFrame {
        VideoFrame {
            camera_id: 1,
            format: VideoFormat::BayerRggb8,
            width: 2,
            height: 1,
            data: Bytes::from_static(&[10, 20]),
            ..Default::default()
        }
    }

    #[test]
    fn pass_through_leaves_frames_alone() {
        let mut frame = bayer();
        apply(VideoHint::PassThrough, Some(&Expand), &mut frame);
        assert_eq!(frame, bayer());
    }

    #[test]
    fn decode_converts_bayer_frames() {
        let mut frame = bayer();
        apply(VideoHint::Decode, Some(&Expand), &mut frame);
        assert_eq!(frame.format, VideoFormat::Bgr8);
        assert_eq!(&frame.data[..], &[10, 10, 10, 20, 20, 20]);
    }

    #[test]
    fn decode_without_decoder_is_a_no_op() {
        let mut frame = bayer();
        apply(VideoHint::Decode, None, &mut frame);
        assert_eq!(frame.format, VideoFormat::BayerRggb8);
    }
}
