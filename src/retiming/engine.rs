//! Pose prediction at an arbitrary time.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use super::history::{PoseHistory, PoseSample};
use super::pose::FramePose;
use crate::{Result, StreamError};

/// A pose produced for a requested time.
#[derive(Debug, Clone)]
pub struct RetimedPose {
    pub time: Instant,
    /// The sample at or before `time` that the pose was built from.
    pub frame_number: u32,
    pub pose: Arc<FramePose>,
}

/// Interpolates inside the history and extrapolates a bounded distance past it.
#[derive(Debug)]
pub struct Retimer {
    history: PoseHistory,
    maximum_prediction: Duration,
}

impl Retimer {
    pub fn new(capacity: usize, maximum_prediction: Duration) -> Self {
        Self { history: PoseHistory::new(capacity), maximum_prediction }
    }

    pub fn history(&self) -> &PoseHistory {
        &self.history
    }

    pub fn maximum_prediction(&self) -> Duration {
        self.maximum_prediction
    }

    pub fn set_maximum_prediction(&mut self, bound: Duration) {
        self.maximum_prediction = bound;
    }

    pub fn push(&mut self, frame_number: u32, time: Instant, pose: FramePose) -> bool {
        self.history.insert(frame_number, time, Arc::new(pose))
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// The pose at `time`.
    ///
    /// Between samples the bracketing pair is blended. Past the newest sample the last
    /// two are extrapolated, up to the maximum prediction; further than that is
    /// [`StreamError::LateDataRequested`].
    pub fn pose_at(&self, time: Instant) -> Result<RetimedPose> {
        let frame_number = self.history.frame_index_closest_to_time(time)?;
        let nearest = self.history.sample(frame_number).ok_or(StreamError::NoFrame)?;

        if let Some(next) = self.history.successor(time) {
            let t = fraction(nearest.time, next.time, time);
            trace!(from = nearest.frame_number, to = next.frame_number, t, "Interpolating");
            return Ok(self.retimed(time, nearest, nearest.pose.interpolate(&next.pose, t)));
        }

        let beyond = time.saturating_duration_since(nearest.time);
        if beyond > self.maximum_prediction {
            return Err(StreamError::LateDataRequested { beyond, limit: self.maximum_prediction });
        }
        if beyond.is_zero() {
            return Ok(self.retimed(time, nearest, (*nearest.pose).clone()));
        }

        match self.history.predecessor(nearest.time) {
            Some(previous) if previous.time < nearest.time => {
                let t = fraction(previous.time, nearest.time, time);
                trace!(from = previous.frame_number, to = nearest.frame_number, t, "Extrapolating");
                // The nearest sample owns occlusion, so blend backwards from it.
                let pose = nearest.pose.interpolate(&previous.pose, 1.0 - t);
                Ok(self.retimed(time, nearest, pose))
            }
            _ => Ok(self.retimed(time, nearest, (*nearest.pose).clone())),
        }
    }

    fn retimed(&self, time: Instant, sample: &PoseSample, pose: FramePose) -> RetimedPose {
        RetimedPose { time, frame_number: sample.frame_number, pose: Arc::new(pose) }
    }
}

/// Position of `at` on the line from `from` (0) to `to` (1).
fn fraction(from: Instant, to: Instant, at: Instant) -> f64 {
    let span = to.saturating_duration_since(from).as_secs_f64();
    if span <= 0.0 {
        return 1.0;
    }
    let offset = if at >= from {
        at.duration_since(from).as_secs_f64()
    } else {
        -from.duration_since(at).as_secs_f64()
    };
    offset / span
}
