//! Per-frame objects.

use std::time::{Duration, Instant};

use crate::protocol::records::{
    CentroidTracks, DeviceFrame, ForceFrame, FrameInfo, GlobalSegments, LatencyInfo,
    LocalSegments, Timecode, UnlabeledMarkers, VideoFrame,
};
use crate::protocol::tag::ObjectTag;

/// Everything decoded for one frame.
#[derive(Debug, Clone)]
pub struct DynamicObjects {
    /// When the frame finished arriving at this client.
    pub received_at: Instant,
    /// Client-side one-way network latency estimate when the frame was published.
    pub network_latency: Option<Duration>,
    pub frame_info: Option<FrameInfo>,
    pub timecode: Option<Timecode>,
    pub latency: Option<LatencyInfo>,
    pub global_segments: Vec<GlobalSegments>,
    pub local_segments: Vec<LocalSegments>,
    pub centroids: Vec<CentroidTracks>,
    pub device_frames: Vec<DeviceFrame>,
    pub force_frames: Vec<ForceFrame>,
    pub video_frames: Vec<VideoFrame>,
    pub unlabeled_markers: Option<UnlabeledMarkers>,
}

impl DynamicObjects {
    pub fn new(received_at: Instant) -> Self {
        Self {
            received_at,
            network_latency: None,
            frame_info: None,
            timecode: None,
            latency: None,
            global_segments: Vec::new(),
            local_segments: Vec::new(),
            centroids: Vec::new(),
            device_frames: Vec::new(),
            force_frames: Vec::new(),
            video_frames: Vec::new(),
            unlabeled_markers: None,
        }
    }

    /// Copy one top-level field from `previous`; non-dynamic tags are ignored.
    pub fn carry_forward(&mut self, previous: &DynamicObjects, tag: ObjectTag) {
        match tag {
            ObjectTag::FrameInfo => self.frame_info = previous.frame_info,
            ObjectTag::Timecode => self.timecode = previous.timecode,
            ObjectTag::LatencyInfo => self.latency = previous.latency.clone(),
            ObjectTag::GlobalSegments => self.global_segments = previous.global_segments.clone(),
            ObjectTag::LocalSegments => self.local_segments = previous.local_segments.clone(),
            ObjectTag::CentroidTracks => self.centroids = previous.centroids.clone(),
            ObjectTag::DeviceFrame => self.device_frames = previous.device_frames.clone(),
            ObjectTag::ForceFrame => self.force_frames = previous.force_frames.clone(),
            ObjectTag::VideoFrame => self.video_frames = previous.video_frames.clone(),
            ObjectTag::UnlabeledMarkers => {
                self.unlabeled_markers = previous.unlabeled_markers.clone()
            }
            _ => {}
        }
    }

    /// When the frame's data was captured, as far as this client can tell: receipt time
    /// minus the server's reported processing latency and the network estimate.
    pub fn capture_time(&self) -> Instant {
        let server = self.latency.as_ref().map(|l| l.total()).unwrap_or_default();
        let network = self.network_latency.unwrap_or_default();
        self.received_at.checked_sub(server.saturating_add(network)).unwrap_or(self.received_at)
    }

    pub fn frame_number(&self) -> Option<u32> {
        self.frame_info.map(|info| info.frame_id)
    }

    pub fn global_segments_for(&self, subject_id: u32) -> Option<&GlobalSegments> {
        self.global_segments.iter().find(|s| s.subject_id == subject_id)
    }

    pub fn local_segments_for(&self, subject_id: u32) -> Option<&LocalSegments> {
        self.local_segments.iter().find(|s| s.subject_id == subject_id)
    }

    pub fn centroids_for(&self, camera_id: u32) -> Option<&CentroidTracks> {
        self.centroids.iter().find(|c| c.camera_id == camera_id)
    }

    pub fn device_frame(&self, device_id: u32, channel_id: u32) -> Option<&DeviceFrame> {
        self.device_frames.iter().find(|f| f.device_id == device_id && f.channel_id == channel_id)
    }

    pub fn force_frame(&self, plate_id: u32) -> Option<&ForceFrame> {
        self.force_frames.iter().find(|f| f.plate_id == plate_id)
    }

    /// All video frames from one camera, oldest first.
    pub fn video_frames_for(&self, camera_id: u32) -> impl Iterator<Item = &VideoFrame> {
        self.video_frames.iter().filter(move |f| f.camera_id == camera_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::records::{LatencySample, SegmentPose};

    #[test]
    fn carry_forward_copies_only_the_named_field() {
        let now = Instant::now();
        let mut previous = DynamicObjects::new(now);
        previous.frame_info = Some(FrameInfo { frame_id: 1 });
        previous.global_segments.push(GlobalSegments {
            subject_id: 2,
            poses: vec![SegmentPose {
                segment_id: 0,
                translation: [1.0, 2.0, 3.0],
                rotation: [0.0, 0.0, 0.0, 1.0],
                occluded: false,
            }],
        });

        let mut next = DynamicObjects::new(now);
        next.frame_info = Some(FrameInfo { frame_id: 2 });
        next.carry_forward(&previous, ObjectTag::GlobalSegments);
        next.carry_forward(&previous, ObjectTag::SubjectInfo);

        assert_eq!(next.frame_number(), Some(2));
        assert_eq!(next.global_segments, previous.global_segments);
        assert!(next.global_segments_for(2).is_some());
        assert!(next.local_segments_for(2).is_none());
    }

    #[test]
    fn capture_time_subtracts_both_latencies() {
        let now = Instant::now() + Duration::from_secs(1);
        let mut objects = DynamicObjects::new(now);
        assert_eq!(objects.capture_time(), now);

        objects.latency = Some(LatencyInfo {
            samples: vec![LatencySample { name: "Solve".into(), seconds: 0.25 }],
        });
        objects.network_latency = Some(Duration::from_millis(5));
        assert_eq!(objects.capture_time(), now - Duration::from_millis(255));
    }
}
