//! Pose retiming: answer "where is this segment at time t" from a rolling history.
//!
//! Every dynamic snapshot is resolved into a [`FramePose`] and stored against its capture
//! time. Queries between two samples interpolate them; queries past the newest sample
//! extrapolate the last observed motion, but only up to a maximum prediction bound.
//! Queries before the history begins are refused rather than invented.

mod client;
mod engine;
mod history;
mod pose;

pub use client::RetimingClient;
pub use engine::{RetimedPose, Retimer};
pub use history::{PoseHistory, PoseSample};
pub use pose::{FramePose, NamedSegment, SegmentState, SubjectPose, Transform};
