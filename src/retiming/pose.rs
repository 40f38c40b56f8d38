//! Decoded subject poses and their interpolation.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::protocol::records::{NO_PARENT, SegmentPose};
use crate::snapshot::{DynamicObjects, StaticObjects};

/// A rigid transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self { translation: Vector3::zeros(), rotation: UnitQuaternion::identity() }
    }
}

impl Transform {
    fn from_pose(pose: &SegmentPose) -> Self {
        let [x, y, z, w] = pose.rotation;
        Self {
            translation: Vector3::from(pose.translation),
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
        }
    }

    /// Blend towards `other` by `t`; values of `t` above one extrapolate.
    ///
    /// Translation is linear. Rotation follows the shortest arc at constant angular
    /// velocity, so `q` and `-q` on either side never send it the long way round.
    pub fn interpolate(&self, other: &Transform, t: f64) -> Transform {
        let translation = self.translation + (other.translation - self.translation) * t;
        let delta = self.rotation.rotation_to(&other.rotation);
        let rotation = UnitQuaternion::from_scaled_axis(delta.scaled_axis() * t) * self.rotation;
        Transform { translation, rotation }
    }
}

/// One segment in one sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SegmentState {
    pub occluded: bool,
    pub global: Transform,
    /// Relative to the parent segment.
    pub local: Transform,
}

impl SegmentState {
    pub fn occluded() -> Self {
        Self { occluded: true, ..Self::default() }
    }

    /// Occlusion on either side pins the result to `self`.
    fn interpolate(&self, other: &SegmentState, t: f64) -> SegmentState {
        if self.occluded {
            return SegmentState::occluded();
        }
        if other.occluded {
            return *self;
        }
        SegmentState {
            occluded: false,
            global: self.global.interpolate(&other.global, t),
            local: self.local.interpolate(&other.local, t),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedSegment {
    pub name: String,
    pub parent: Option<String>,
    pub state: SegmentState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectPose {
    pub name: String,
    /// Topology order, root first.
    pub segments: Vec<NamedSegment>,
}

impl SubjectPose {
    pub fn segment(&self, name: &str) -> Option<&NamedSegment> {
        self.segments.iter().find(|s| s.name == name)
    }
}

/// Every subject's pose in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramePose {
    pub subjects: Vec<SubjectPose>,
}

impl FramePose {
    /// Resolve a dynamic snapshot against the subject topology it belongs to.
    ///
    /// Segments without a pose in the frame are recorded as occluded.
    pub fn from_snapshots(statics: &StaticObjects, dynamics: &DynamicObjects) -> Self {
        let subjects = statics
            .subjects
            .iter()
            .map(|subject| {
                let global = dynamics.global_segments_for(subject.subject_id);
                let local = dynamics.local_segments_for(subject.subject_id);
                let name_of = |id: u32| {
                    subject.segments.iter().find(|s| s.segment_id == id).map(|s| s.name.clone())
                };
                let segments = subject
                    .segments
                    .iter()
                    .map(|info| {
                        let find = |poses: &[SegmentPose]| {
                            poses.iter().find(|p| p.segment_id == info.segment_id).cloned()
                        };
                        let global = global.and_then(|g| find(&g.poses));
                        let local = local.and_then(|l| find(&l.poses));
                        let state = match global {
                            Some(pose) if !pose.occluded => SegmentState {
                                occluded: false,
                                global: Transform::from_pose(&pose),
                                local: local
                                    .filter(|l| !l.occluded)
                                    .map(|l| Transform::from_pose(&l))
                                    .unwrap_or_default(),
                            },
                            _ => SegmentState::occluded(),
                        };
                        let parent =
                            if info.parent_id == NO_PARENT { None } else { name_of(info.parent_id) };
                        NamedSegment { name: info.name.clone(), parent, state }
                    })
                    .collect();
                SubjectPose { name: subject.name.clone(), segments }
            })
            .collect();
        Self { subjects }
    }

    pub fn subject(&self, name: &str) -> Option<&SubjectPose> {
        self.subjects.iter().find(|s| s.name == name)
    }

    /// Blend towards `other` by `t`, matching subjects and segments by name.
    ///
    /// `self` is the nearest sample and decides topology and occlusion; anything
    /// missing from `other` keeps its value from `self`.
    pub fn interpolate(&self, other: &FramePose, t: f64) -> FramePose {
        let subjects = self
            .subjects
            .iter()
            .map(|subject| {
                let counterpart = other.subject(&subject.name);
                let segments = subject
                    .segments
                    .iter()
                    .map(|segment| {
                        let state = match counterpart.and_then(|c| c.segment(&segment.name)) {
                            Some(theirs) => segment.state.interpolate(&theirs.state, t),
                            None => segment.state,
                        };
                        NamedSegment { state, ..segment.clone() }
                    })
                    .collect();
                SubjectPose { name: subject.name.clone(), segments }
            })
            .collect();
        FramePose { subjects }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::records::{GlobalSegments, SegmentInfo, SubjectInfo};
    use std::f64::consts::PI;
    use std::time::Instant;

    fn at(x: f64) -> Transform {
        Transform { translation: Vector3::new(x, 0.0, 0.0), rotation: UnitQuaternion::identity() }
    }

    #[test]
    fn translation_is_linear() {
        let mid = at(0.0).interpolate(&at(10.0), 0.5);
        assert!((mid.translation - Vector3::new(5.0, 0.0, 0.0)).norm() < 1e-12);
        let ahead = at(0.0).interpolate(&at(10.0), 1.2);
        assert!((ahead.translation.x - 12.0).abs() < 1e-12);
    }

    #[test]
    fn rotation_takes_the_short_way() {
        let a = Transform::default();
        let turned = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 170f64.to_radians());
        // Same rotation, opposite hemisphere.
        let flipped = UnitQuaternion::new_unchecked(-turned.into_inner());
        let b = Transform { translation: Vector3::zeros(), rotation: flipped };

        let mid = a.interpolate(&b, 0.5);
        let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 85f64.to_radians());
        assert!(mid.rotation.angle_to(&expected) < 1e-9);
    }

    #[test]
    fn rotation_extrapolates_at_constant_rate() {
        let a = Transform::default();
        let b = Transform {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI / 8.0),
        };
        let ahead = a.interpolate(&b, 2.0);
        assert!((ahead.rotation.angle() - PI / 4.0).abs() < 1e-9);
    }

    #[test]
    fn occlusion_is_never_interpolated() {
        let seen = SegmentState { occluded: false, global: at(1.0), local: at(1.0) };
        let hidden = SegmentState::occluded();
        assert!(hidden.interpolate(&seen, 0.5).occluded);
        assert_eq!(seen.interpolate(&hidden, 0.5), seen);
    }

    #[test]
    fn snapshots_resolve_names_and_occlusion() {
        let mut statics = StaticObjects::default();
        statics.subjects.push(SubjectInfo {
            subject_id: 3,
            name: "Bob".into(),
            segments: vec![
                SegmentInfo { segment_id: 0, parent_id: NO_PARENT, name: "Pelvis".into() },
                SegmentInfo { segment_id: 1, parent_id: 0, name: "Thorax".into() },
            ],
        });
        statics.build_indices();

        let mut dynamics = DynamicObjects::new(Instant::now());
        dynamics.global_segments.push(GlobalSegments {
            subject_id: 3,
            poses: vec![SegmentPose {
                segment_id: 0,
                translation: [1.0, 2.0, 3.0],
                rotation: [0.0, 0.0, 0.0, 1.0],
                occluded: false,
            }],
        });

        let pose = FramePose::from_snapshots(&statics, &dynamics);
        let bob = pose.subject("Bob").unwrap();
        let pelvis = bob.segment("Pelvis").unwrap();
        assert!(!pelvis.state.occluded);
        assert_eq!(pelvis.state.global.translation, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(pelvis.parent, None);

        let thorax = bob.segment("Thorax").unwrap();
        assert!(thorax.state.occluded);
        assert_eq!(thorax.parent.as_deref(), Some("Pelvis"));
    }
}
