//! Per-session, rarely changing objects.

use std::collections::HashMap;

use crate::protocol::records::{
    ApplicationInfo, CameraInfo, DeviceInfo, ForcePlateInfo, NO_PARENT, StreamInfo, SubjectInfo,
};
use crate::protocol::tag::ObjectTag;

/// Calibration, topology and device catalogue for the current session.
///
/// Immutable once published; the lookup indices are built by [`StaticObjects::build_indices`]
/// before publication and rebuilt for every new snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticObjects {
    pub stream_info: Option<StreamInfo>,
    pub application_info: Option<ApplicationInfo>,
    pub cameras: Vec<CameraInfo>,
    pub subjects: Vec<SubjectInfo>,
    pub devices: Vec<DeviceInfo>,
    pub force_plates: Vec<ForcePlateInfo>,
    index: StaticIndex,
}

/// ID and name lookups derived from the record lists.
#[derive(Debug, Clone, Default)]
struct StaticIndex {
    subject_by_id: HashMap<u32, usize>,
    subject_by_name: HashMap<String, usize>,
    /// Per subject: segment name -> position in `segments`.
    segment_by_name: Vec<HashMap<String, usize>>,
    /// Per subject: segment id -> position in `segments`.
    segment_by_id: Vec<HashMap<u32, usize>>,
    camera_by_id: HashMap<u32, usize>,
    camera_by_name: HashMap<String, usize>,
    device_by_id: HashMap<u32, usize>,
    device_by_name: HashMap<String, usize>,
    force_plate_by_id: HashMap<u32, usize>,
}

impl StaticObjects {
    /// Copy one top-level field from `previous`; non-static tags are ignored.
    pub fn carry_forward(&mut self, previous: &StaticObjects, tag: ObjectTag) {
        match tag {
            ObjectTag::StreamInfo => self.stream_info = previous.stream_info,
            ObjectTag::ApplicationInfo => self.application_info = previous.application_info,
            ObjectTag::CameraInfo => self.cameras = previous.cameras.clone(),
            ObjectTag::SubjectInfo => self.subjects = previous.subjects.clone(),
            ObjectTag::DeviceInfo => self.devices = previous.devices.clone(),
            ObjectTag::ForcePlateInfo => self.force_plates = previous.force_plates.clone(),
            _ => {}
        }
    }

    /// Rebuild every lookup index from the current record lists.
    pub fn build_indices(&mut self) {
        let mut index = StaticIndex::default();
        for (i, subject) in self.subjects.iter().enumerate() {
            index.subject_by_id.insert(subject.subject_id, i);
            index.subject_by_name.insert(subject.name.clone(), i);
            index.segment_by_name.push(
                subject.segments.iter().enumerate().map(|(j, s)| (s.name.clone(), j)).collect(),
            );
            index
                .segment_by_id
                .push(subject.segments.iter().enumerate().map(|(j, s)| (s.segment_id, j)).collect());
        }
        for (i, camera) in self.cameras.iter().enumerate() {
            index.camera_by_id.insert(camera.camera_id, i);
            index.camera_by_name.insert(camera.name.clone(), i);
        }
        for (i, device) in self.devices.iter().enumerate() {
            index.device_by_id.insert(device.device_id, i);
            index.device_by_name.insert(device.name.clone(), i);
        }
        for (i, plate) in self.force_plates.iter().enumerate() {
            index.force_plate_by_id.insert(plate.plate_id, i);
        }
        self.index = index;
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.stream_info.map(|info| info.frame_rate)
    }

    pub fn subject_names(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(|s| s.name.as_str())
    }

    pub fn subject_position(&self, name: &str) -> Option<usize> {
        self.index.subject_by_name.get(name).copied()
    }

    pub fn subject(&self, name: &str) -> Option<&SubjectInfo> {
        self.subject_position(name).map(|i| &self.subjects[i])
    }

    pub fn subject_by_id(&self, subject_id: u32) -> Option<&SubjectInfo> {
        self.index.subject_by_id.get(&subject_id).map(|i| &self.subjects[*i])
    }

    /// Position of a segment within its subject's segment list.
    pub fn segment_position(&self, subject: usize, segment: &str) -> Option<usize> {
        self.index.segment_by_name.get(subject)?.get(segment).copied()
    }

    pub fn segment_position_by_id(&self, subject: usize, segment_id: u32) -> Option<usize> {
        self.index.segment_by_id.get(subject)?.get(&segment_id).copied()
    }

    /// Names of the segments whose parent is `segment_id`.
    pub fn children_of(&self, subject: usize, segment_id: u32) -> Vec<&str> {
        self.subjects
            .get(subject)
            .map(|s| {
                s.segments
                    .iter()
                    .filter(|seg| seg.parent_id == segment_id && seg.segment_id != segment_id)
                    .map(|seg| seg.name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First segment without a parent.
    pub fn root_segment(&self, subject: usize) -> Option<&str> {
        self.subjects
            .get(subject)?
            .segments
            .iter()
            .find(|seg| seg.parent_id == NO_PARENT)
            .map(|seg| seg.name.as_str())
    }

    pub fn camera(&self, name: &str) -> Option<&CameraInfo> {
        self.index.camera_by_name.get(name).map(|i| &self.cameras[*i])
    }

    pub fn camera_by_id(&self, camera_id: u32) -> Option<&CameraInfo> {
        self.index.camera_by_id.get(&camera_id).map(|i| &self.cameras[*i])
    }

    pub fn device(&self, name: &str) -> Option<&DeviceInfo> {
        self.index.device_by_name.get(name).map(|i| &self.devices[*i])
    }

    pub fn device_by_id(&self, device_id: u32) -> Option<&DeviceInfo> {
        self.index.device_by_id.get(&device_id).map(|i| &self.devices[*i])
    }

    pub fn force_plate_by_id(&self, plate_id: u32) -> Option<&ForcePlateInfo> {
        self.index.force_plate_by_id.get(&plate_id).map(|i| &self.force_plates[*i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::records::SegmentInfo;

    fn bob() -> SubjectInfo {
        SubjectInfo {
            subject_id: 7,
            name: "Bob".into(),
            segments: vec![
                SegmentInfo { segment_id: 0, parent_id: NO_PARENT, name: "Pelvis".into() },
                SegmentInfo { segment_id: 1, parent_id: 0, name: "LFemur".into() },
                SegmentInfo { segment_id: 2, parent_id: 0, name: "RFemur".into() },
            ],
        }
    }

    #[test]
    fn indices_resolve_names_and_ids() {
        let mut objects = StaticObjects { subjects: vec![bob()], ..Default::default() };
        objects.build_indices();

        let subject = objects.subject_position("Bob").unwrap();
        assert_eq!(objects.subject_by_id(7).unwrap().name, "Bob");
        assert_eq!(objects.segment_position(subject, "RFemur"), Some(2));
        assert_eq!(objects.segment_position_by_id(subject, 1), Some(1));
        assert_eq!(objects.root_segment(subject), Some("Pelvis"));
        assert_eq!(objects.children_of(subject, 0), vec!["LFemur", "RFemur"]);
        assert!(objects.subject("Alice").is_none());
    }

    #[test]
    fn indices_are_rebuilt_not_inherited() {
        let mut previous = StaticObjects { subjects: vec![bob()], ..Default::default() };
        previous.build_indices();

        let mut next = StaticObjects::default();
        next.carry_forward(&previous, ObjectTag::CameraInfo);
        next.build_indices();
        assert!(next.subject("Bob").is_none());

        next.carry_forward(&previous, ObjectTag::SubjectInfo);
        next.build_indices();
        assert!(next.subject("Bob").is_some());
    }
}
