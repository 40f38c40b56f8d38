//! Bounded, time-indexed pose history.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::pose::FramePose;
use crate::{Result, StreamError};

/// One received frame, stamped with the time its data was captured.
#[derive(Debug, Clone)]
pub struct PoseSample {
    pub frame_number: u32,
    pub time: Instant,
    pub pose: Arc<FramePose>,
}

/// Frame-ordered samples plus a receipt-time index over them.
///
/// Sample times are trusted as given: out-of-order times are indexed where they fall,
/// and two samples with the same time keep the later frame.
#[derive(Debug)]
pub struct PoseHistory {
    frames: BTreeMap<u32, PoseSample>,
    times: BTreeMap<Instant, u32>,
    capacity: usize,
}

impl PoseHistory {
    pub fn new(capacity: usize) -> Self {
        Self { frames: BTreeMap::new(), times: BTreeMap::new(), capacity: capacity.max(2) }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.times.clear();
    }

    /// Append a sample. Returns whether it was kept.
    ///
    /// A repeat of the newest frame number is dropped. A lower one means the server's
    /// counter was reset, so the old timeline is discarded and the sample starts a new one.
    pub fn insert(&mut self, frame_number: u32, time: Instant, pose: Arc<FramePose>) -> bool {
        if let Some((&last, _)) = self.frames.last_key_value() {
            if frame_number == last {
                debug!(frame_number, "Dropping repeated frame");
                return false;
            }
            if frame_number < last {
                debug!(frame_number, last, "Frame counter went backwards, restarting history");
                self.clear();
            }
        }
        self.frames.insert(frame_number, PoseSample { frame_number, time, pose });
        self.times.insert(time, frame_number);

        while self.frames.len() > self.capacity {
            let Some((_, oldest)) = self.frames.pop_first() else {
                break;
            };
            if self.times.get(&oldest.time) == Some(&oldest.frame_number) {
                self.times.remove(&oldest.time);
            }
        }
        true
    }

    pub fn latest(&self) -> Option<&PoseSample> {
        self.frames.last_key_value().map(|(_, sample)| sample)
    }

    pub fn sample(&self, frame_number: u32) -> Option<&PoseSample> {
        self.frames.get(&frame_number)
    }

    /// The frame whose time is the largest at or before `time`.
    ///
    /// Past the newest sample this is the newest frame; before the oldest it is
    /// [`StreamError::EarlyDataRequested`].
    pub fn frame_index_closest_to_time(&self, time: Instant) -> Result<u32> {
        if let Some((_, &frame)) = self.times.range(..=time).next_back() {
            return Ok(frame);
        }
        match self.times.first_key_value() {
            Some((&first, _)) => Err(StreamError::EarlyDataRequested { before: first - time }),
            None => Err(StreamError::NoFrame),
        }
    }

    /// The first sample strictly after `time`.
    pub fn successor(&self, time: Instant) -> Option<&PoseSample> {
        use std::ops::Bound::{Excluded, Unbounded};
        self.times
            .range((Excluded(time), Unbounded))
            .next()
            .and_then(|(_, frame)| self.frames.get(frame))
    }

    /// The last sample strictly before `time`.
    pub fn predecessor(&self, time: Instant) -> Option<&PoseSample> {
        self.times.range(..time).next_back().and_then(|(_, frame)| self.frames.get(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn history_at(base: Instant, times_ms: &[u64]) -> PoseHistory {
        let mut history = PoseHistory::new(16);
        for (i, ms) in times_ms.iter().enumerate() {
            let inserted = history.insert(
                i as u32 + 1,
                base + Duration::from_millis(*ms),
                Arc::new(FramePose::default()),
            );
            assert!(inserted);
        }
        history
    }

    #[test]
    fn closest_frame_is_a_predecessor_lookup() {
        let base = Instant::now();
        let history = history_at(base, &[10, 20, 30]);
        let at = |ms| history.frame_index_closest_to_time(base + Duration::from_millis(ms));

        assert_eq!(at(25).unwrap(), 2);
        assert_eq!(at(20).unwrap(), 2);
        assert_eq!(at(1000).unwrap(), 3);
        assert!(matches!(at(5), Err(StreamError::EarlyDataRequested { .. })));
    }

    #[test]
    fn empty_history_has_no_frame() {
        let history = PoseHistory::new(4);
        assert!(matches!(
            history.frame_index_closest_to_time(Instant::now()),
            Err(StreamError::NoFrame)
        ));
    }

    #[test]
    fn repeated_frame_is_dropped() {
        let base = Instant::now();
        let mut history = history_at(base, &[10, 20]);
        assert!(!history.insert(2, base + Duration::from_millis(30), Arc::default()));
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().map(|s| s.time), Some(base + Duration::from_millis(20)));
    }

    #[test]
    fn counter_reset_starts_a_new_timeline() {
        let base = Instant::now();
        let mut history = PoseHistory::new(16);
        assert!(history.insert(1000, base, Arc::default()));
        assert!(history.insert(1001, base + Duration::from_millis(10), Arc::default()));

        assert!(history.insert(1, base + Duration::from_millis(200), Arc::default()));
        assert!(history.insert(2, base + Duration::from_millis(210), Arc::default()));
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().map(|s| s.frame_number), Some(2));

        let at = base + Duration::from_millis(205);
        assert_eq!(history.frame_index_closest_to_time(at).unwrap(), 1);
        assert!(matches!(
            history.frame_index_closest_to_time(base + Duration::from_millis(10)),
            Err(StreamError::EarlyDataRequested { .. })
        ));
    }

    #[test]
    fn equal_times_keep_the_newest_frame() {
        let base = Instant::now();
        let history = history_at(base, &[10, 10]);
        assert_eq!(history.frame_index_closest_to_time(base + Duration::from_millis(10)).unwrap(), 2);
    }

    #[test]
    fn neighbours_are_strict() {
        let base = Instant::now();
        let history = history_at(base, &[10, 20, 30]);
        let t = base + Duration::from_millis(20);
        assert_eq!(history.successor(t).map(|s| s.frame_number), Some(3));
        assert_eq!(history.predecessor(t).map(|s| s.frame_number), Some(1));
        assert!(history.successor(base + Duration::from_millis(30)).is_none());
    }

    proptest! {
        #[test]
        fn pruning_keeps_the_newest(capacity in 2usize..16, count in 1usize..64) {
            let base = Instant::now();
            let mut history = PoseHistory::new(capacity);
            for i in 0..count {
                history.insert(i as u32, base + Duration::from_millis(i as u64), Arc::default());
            }
            prop_assert_eq!(history.len(), count.min(capacity));
            prop_assert_eq!(history.latest().map(|s| s.frame_number), Some(count as u32 - 1));
            let oldest = (count - count.min(capacity)) as u32;
            prop_assert_eq!(
                history.frame_index_closest_to_time(base + Duration::from_millis(oldest as u64)).ok(),
                Some(oldest)
            );
        }
    }
}
