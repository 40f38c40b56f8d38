//! Frozen view over one static + dynamic snapshot pair.

use nalgebra::{Quaternion, UnitQuaternion};
use std::sync::Arc;
use std::time::Duration;

use super::axis::AxisMapping;
use super::{DynamicObjects, StaticObjects};
use crate::protocol::records::{
    Centroid, LatencySample, NO_PARENT, SegmentPose, SubjectInfo, Timecode, VideoFrame,
};
use crate::{Result, StreamError};

/// A segment's rigid transform as served to callers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentTransform {
    pub translation: [f64; 3],
    pub rotation: UnitQuaternion<f64>,
    /// Occluded segments report a zero translation and identity rotation.
    pub occluded: bool,
}

impl SegmentTransform {
    pub fn occluded() -> Self {
        Self { translation: [0.0; 3], rotation: UnitQuaternion::identity(), occluded: true }
    }

    fn from_pose(pose: &SegmentPose) -> Self {
        if pose.occluded {
            return Self::occluded();
        }
        let [x, y, z, w] = pose.rotation;
        Self {
            translation: pose.translation,
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
            occluded: false,
        }
    }
}

/// One consistent frame: repeated queries against it always agree.
///
/// Obtained from [`crate::Client::frame`]; holds its snapshots by `Arc`, so a newer
/// publication never changes what this view returns.
#[derive(Debug, Clone)]
pub struct Frame {
    static_objects: Arc<StaticObjects>,
    dynamic_objects: Arc<DynamicObjects>,
    axes: AxisMapping,
}

impl Frame {
    pub fn new(
        static_objects: Arc<StaticObjects>,
        dynamic_objects: Arc<DynamicObjects>,
        axes: AxisMapping,
    ) -> Self {
        Self { static_objects, dynamic_objects, axes }
    }

    pub fn static_objects(&self) -> &Arc<StaticObjects> {
        &self.static_objects
    }

    pub fn dynamic_objects(&self) -> &Arc<DynamicObjects> {
        &self.dynamic_objects
    }

    pub fn axis_mapping(&self) -> AxisMapping {
        self.axes
    }

    pub fn frame_number(&self) -> Result<u32> {
        self.dynamic_objects.frame_number().ok_or(StreamError::NoFrame)
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.static_objects.frame_rate()
    }

    pub fn timecode(&self) -> Option<Timecode> {
        self.dynamic_objects.timecode
    }

    /// Total server-reported processing latency.
    pub fn latency_total(&self) -> Duration {
        self.dynamic_objects.latency.as_ref().map(|l| l.total()).unwrap_or_default()
    }

    pub fn latency_samples(&self) -> &[LatencySample] {
        self.dynamic_objects.latency.as_ref().map(|l| l.samples.as_slice()).unwrap_or_default()
    }

    // Subjects and segments

    pub fn subject_count(&self) -> usize {
        self.static_objects.subjects.len()
    }

    pub fn subject_name(&self, index: usize) -> Result<&str> {
        self.static_objects
            .subjects
            .get(index)
            .map(|s| s.name.as_str())
            .ok_or_else(|| StreamError::invalid_index(index, self.subject_count()))
    }

    pub fn subject_names(&self) -> Vec<&str> {
        self.static_objects.subject_names().collect()
    }

    pub fn root_segment_name(&self, subject: &str) -> Result<&str> {
        let position = self.subject_position(subject)?;
        self.static_objects
            .root_segment(position)
            .ok_or_else(|| StreamError::InvalidSegmentName { name: "<root>".into() })
    }

    pub fn segment_count(&self, subject: &str) -> Result<usize> {
        Ok(self.subject_info(subject)?.segments.len())
    }

    pub fn segment_name(&self, subject: &str, index: usize) -> Result<&str> {
        let info = self.subject_info(subject)?;
        info.segments
            .get(index)
            .map(|s| s.name.as_str())
            .ok_or_else(|| StreamError::invalid_index(index, info.segments.len()))
    }

    /// `None` for the root segment.
    pub fn segment_parent_name(&self, subject: &str, segment: &str) -> Result<Option<&str>> {
        let (subject_pos, segment_pos) = self.segment_position(subject, segment)?;
        let info = &self.static_objects.subjects[subject_pos];
        let parent_id = info.segments[segment_pos].parent_id;
        if parent_id == NO_PARENT {
            return Ok(None);
        }
        Ok(self
            .static_objects
            .segment_position_by_id(subject_pos, parent_id)
            .map(|p| info.segments[p].name.as_str()))
    }

    pub fn segment_children(&self, subject: &str, segment: &str) -> Result<Vec<&str>> {
        let (subject_pos, segment_pos) = self.segment_position(subject, segment)?;
        let segment_id = self.static_objects.subjects[subject_pos].segments[segment_pos].segment_id;
        Ok(self.static_objects.children_of(subject_pos, segment_id))
    }

    /// World-space transform, in the configured output axes.
    pub fn segment_global(&self, subject: &str, segment: &str) -> Result<SegmentTransform> {
        let (subject_id, segment_id) = self.segment_ids(subject, segment)?;
        let transform = self
            .dynamic_objects
            .global_segments_for(subject_id)
            .and_then(|s| s.poses.iter().find(|p| p.segment_id == segment_id))
            .map(SegmentTransform::from_pose)
            .unwrap_or_else(SegmentTransform::occluded);
        if transform.occluded {
            return Ok(transform);
        }
        Ok(SegmentTransform {
            translation: self.axes.map_translation(transform.translation),
            rotation: self.axes.map_rotation(transform.rotation),
            occluded: false,
        })
    }

    /// Parent-relative transform; axis mapping does not apply.
    pub fn segment_local(&self, subject: &str, segment: &str) -> Result<SegmentTransform> {
        let (subject_id, segment_id) = self.segment_ids(subject, segment)?;
        Ok(self
            .dynamic_objects
            .local_segments_for(subject_id)
            .and_then(|s| s.poses.iter().find(|p| p.segment_id == segment_id))
            .map(SegmentTransform::from_pose)
            .unwrap_or_else(SegmentTransform::occluded))
    }

    // Cameras

    pub fn camera_count(&self) -> usize {
        self.static_objects.cameras.len()
    }

    pub fn camera_name(&self, index: usize) -> Result<&str> {
        self.static_objects
            .cameras
            .get(index)
            .map(|c| c.name.as_str())
            .ok_or_else(|| StreamError::invalid_index(index, self.camera_count()))
    }

    pub fn centroids(&self, camera: &str) -> Result<&[Centroid]> {
        let camera_id = self.camera_id(camera)?;
        Ok(self
            .dynamic_objects
            .centroids_for(camera_id)
            .map(|tracks| tracks.centroids.as_slice())
            .unwrap_or_default())
    }

    pub fn video_frames(&self, camera: &str) -> Result<Vec<&VideoFrame>> {
        let camera_id = self.camera_id(camera)?;
        Ok(self.dynamic_objects.video_frames_for(camera_id).collect())
    }

    // Devices and force plates

    pub fn device_count(&self) -> usize {
        self.static_objects.devices.len()
    }

    pub fn device_name(&self, index: usize) -> Result<&str> {
        self.static_objects
            .devices
            .get(index)
            .map(|d| d.name.as_str())
            .ok_or_else(|| StreamError::invalid_index(index, self.device_count()))
    }

    /// Samples for one channel this frame; devices may run faster than the camera rate.
    pub fn device_output_values(&self, device: &str, channel: &str) -> Result<&[f32]> {
        let info = self
            .static_objects
            .device(device)
            .ok_or_else(|| StreamError::InvalidDeviceName { name: device.to_string() })?;
        let channel_id = info
            .channels
            .iter()
            .find(|c| c.name == channel)
            .map(|c| c.channel_id)
            .ok_or_else(|| StreamError::InvalidDeviceName { name: format!("{device}.{channel}") })?;
        Ok(self
            .dynamic_objects
            .device_frame(info.device_id, channel_id)
            .map(|f| f.samples.as_slice())
            .unwrap_or_default())
    }

    pub fn force_plate_count(&self) -> usize {
        self.static_objects.force_plates.len()
    }

    /// Force, moment and centre of pressure in output axes; zero when no sample arrived.
    pub fn force_plate_vectors(&self, index: usize) -> Result<([f64; 3], [f64; 3], [f64; 3])> {
        let plate = self
            .static_objects
            .force_plates
            .get(index)
            .ok_or_else(|| StreamError::invalid_index(index, self.force_plate_count()))?;
        Ok(self
            .dynamic_objects
            .force_frame(plate.plate_id)
            .map(|f| {
                (
                    self.axes.map_translation(f.force),
                    self.axes.map_translation(f.moment),
                    self.axes.map_translation(f.centre_of_pressure),
                )
            })
            .unwrap_or_default())
    }

    pub fn unlabeled_markers(&self) -> Vec<[f64; 3]> {
        self.dynamic_objects
            .unlabeled_markers
            .as_ref()
            .map(|m| m.positions.iter().map(|p| self.axes.map_translation(*p)).collect())
            .unwrap_or_default()
    }

    fn subject_position(&self, subject: &str) -> Result<usize> {
        self.static_objects
            .subject_position(subject)
            .ok_or_else(|| StreamError::InvalidSubjectName { name: subject.to_string() })
    }

    fn subject_info(&self, subject: &str) -> Result<&SubjectInfo> {
        let position = self.subject_position(subject)?;
        Ok(&self.static_objects.subjects[position])
    }

    fn segment_position(&self, subject: &str, segment: &str) -> Result<(usize, usize)> {
        let subject_pos = self.subject_position(subject)?;
        let segment_pos = self
            .static_objects
            .segment_position(subject_pos, segment)
            .ok_or_else(|| StreamError::InvalidSegmentName { name: segment.to_string() })?;
        Ok((subject_pos, segment_pos))
    }

    fn segment_ids(&self, subject: &str, segment: &str) -> Result<(u32, u32)> {
        let (subject_pos, segment_pos) = self.segment_position(subject, segment)?;
        let info = &self.static_objects.subjects[subject_pos];
        Ok((info.subject_id, info.segments[segment_pos].segment_id))
    }

    fn camera_id(&self, camera: &str) -> Result<u32> {
        self.static_objects
            .camera(camera)
            .map(|c| c.camera_id)
            .ok_or_else(|| StreamError::InvalidCameraName { name: camera.to_string() })
    }
}
