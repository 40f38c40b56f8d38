//! Outbound control state, coalesced into one batch per pump cycle.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::latency::LatencyTracker;
use crate::config::StreamMode;
use crate::protocol::ObjectRecord;
use crate::protocol::records::{
    Filter, FilterEntry, HapticCommand, HapticFeedback, ObjectEnums, Ping, RequestFrame,
};
use crate::protocol::tag::{ObjectTag, ObjectTagSet};

bitflags! {
    /// Control state changed since the last successful flush.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PendingChanges: u8 {
        const OBJECT_ENUMS = 0b0001;
        const FILTER = 0b0010;
        const HAPTIC = 0b0100;
        const STREAM_MODE = 0b1000;
    }
}

/// Optional data families the caller can switch on and off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Segments,
    Centroids,
    Devices,
    Video,
    UnlabeledMarkers,
}

impl DataKind {
    pub fn tags(self) -> &'static [ObjectTag] {
        match self {
            DataKind::Segments => &[ObjectTag::GlobalSegments, ObjectTag::LocalSegments],
            DataKind::Centroids => &[ObjectTag::CentroidTracks],
            DataKind::Devices => &[ObjectTag::DeviceFrame, ObjectTag::ForceFrame],
            DataKind::Video => &[ObjectTag::VideoFrame],
            DataKind::UnlabeledMarkers => &[ObjectTag::UnlabeledMarkers],
        }
    }
}

/// Kinds requested regardless of what the caller enables.
pub fn base_objects() -> ObjectTagSet {
    let mut set: ObjectTagSet = ObjectTag::STATIC.into_iter().collect();
    set.extend([
        ObjectTag::FrameInfo,
        ObjectTag::Timecode,
        ObjectTag::LatencyInfo,
        ObjectTag::Contents,
        ObjectTag::Ping,
    ]);
    set
}

/// One outbound frame's worth of control records.
#[derive(Debug)]
pub struct OutboundBatch {
    records: Vec<ObjectRecord>,
    flags: PendingChanges,
    revision: u64,
    ping: Option<u32>,
}

impl OutboundBatch {
    pub fn records(&self) -> &[ObjectRecord] {
        &self.records
    }
}

/// Everything the pump sends, guarded by one lock.
#[derive(Debug)]
pub struct ControlState {
    pending: PendingChanges,
    /// Bumped on every mutation, so a commit only clears flags nobody touched since.
    revision: u64,
    supported: Option<ObjectTagSet>,
    wanted: ObjectTagSet,
    filter: Filter,
    haptic: Vec<HapticCommand>,
    stream_mode: StreamMode,
    pub latency: LatencyTracker,
}

impl ControlState {
    pub fn new(rtt_window: usize, stream_mode: StreamMode) -> Self {
        Self {
            pending: PendingChanges::STREAM_MODE,
            revision: 0,
            supported: None,
            wanted: base_objects(),
            filter: Filter::default(),
            haptic: Vec::new(),
            stream_mode,
            latency: LatencyTracker::new(rtt_window),
        }
    }

    /// Forget per-connection state; caller preferences survive and are resent.
    pub fn reset_session(&mut self, rtt_window: usize) {
        self.supported = None;
        self.latency = LatencyTracker::new(rtt_window);
        let mut pending = PendingChanges::STREAM_MODE;
        if !self.filter.entries.is_empty() {
            pending |= PendingChanges::FILTER;
        }
        if !self.haptic.is_empty() {
            pending |= PendingChanges::HAPTIC;
        }
        self.mark(pending);
    }

    fn mark(&mut self, changes: PendingChanges) {
        self.pending |= changes;
        self.revision += 1;
    }

    #[cfg(test)]
    pub fn pending(&self) -> PendingChanges {
        self.pending
    }

    /// Server capabilities, from the handshake or a mid-stream update.
    pub fn set_supported(&mut self, supported: ObjectTagSet) {
        self.supported = Some(supported);
        self.mark(PendingChanges::OBJECT_ENUMS);
    }

    pub fn supported(&self) -> Option<&ObjectTagSet> {
        self.supported.as_ref()
    }

    pub fn set_enabled(&mut self, kind: DataKind, enabled: bool) {
        for tag in kind.tags() {
            if enabled {
                self.wanted.insert(*tag);
            } else {
                self.wanted.remove(*tag);
            }
        }
        self.mark(PendingChanges::OBJECT_ENUMS);
    }

    pub fn is_enabled(&self, kind: DataKind) -> bool {
        kind.tags().iter().all(|tag| self.wanted.contains(*tag))
    }

    /// Replace the wanted set; the base kinds are always kept.
    pub fn set_wanted(&mut self, wanted: impl IntoIterator<Item = ObjectTag>) {
        let mut set = base_objects();
        set.extend(wanted);
        self.wanted = set;
        self.mark(PendingChanges::OBJECT_ENUMS);
    }

    pub fn wanted(&self) -> &ObjectTagSet {
        &self.wanted
    }

    /// Wanted ∩ supported, once the server has said what it supports.
    pub fn requested(&self) -> Option<ObjectTagSet> {
        self.supported.as_ref().map(|supported| self.wanted.intersection(supported))
    }

    /// Restrict `tag` to `ids`; an empty list removes the restriction.
    pub fn set_filter(&mut self, tag: ObjectTag, ids: Vec<u32>) {
        self.filter.entries.retain(|entry| entry.tag != tag);
        if !ids.is_empty() {
            self.filter.entries.push(FilterEntry { tag, ids });
        }
        self.mark(PendingChanges::FILTER);
    }

    pub fn set_haptic(&mut self, device_id: u32, enabled: bool) {
        match self.haptic.iter_mut().find(|c| c.device_id == device_id) {
            Some(command) => command.enabled = enabled,
            None => self.haptic.push(HapticCommand { device_id, enabled }),
        }
        self.mark(PendingChanges::HAPTIC);
    }

    pub fn set_stream_mode(&mut self, mode: StreamMode) {
        self.stream_mode = mode;
        self.mark(PendingChanges::STREAM_MODE);
    }

    pub fn stream_mode(&self) -> StreamMode {
        self.stream_mode
    }

    /// Build this cycle's batch; `None` when there is nothing to send.
    ///
    /// `frame_waiting` reports whether a frame is already readable, in which case pull
    /// modes skip their request.
    pub fn prepare(&mut self, frame_waiting: bool) -> Option<OutboundBatch> {
        let mut records: Vec<ObjectRecord> = Vec::new();
        let flags = self.pending;

        if flags.contains(PendingChanges::OBJECT_ENUMS) {
            if let Some(tags) = self.requested() {
                records.push(ObjectEnums { tags }.into());
            }
        }
        if flags.contains(PendingChanges::FILTER) {
            records.push(self.filter.clone().into());
        }
        if flags.contains(PendingChanges::HAPTIC) {
            records.push(HapticFeedback { commands: self.haptic.clone() }.into());
        }

        let ping = self.latency.take_pending();
        if let Some(ping_id) = ping {
            records.push(Ping { ping_id }.into());
        }

        let requests = match self.stream_mode {
            StreamMode::ServerPush => 0,
            StreamMode::ClientPull if frame_waiting => 0,
            StreamMode::ClientPull => 1,
            // Entering pre-fetch puts a second request in flight; afterwards one per frame.
            StreamMode::ClientPullPreFetch if flags.contains(PendingChanges::STREAM_MODE) => 2,
            StreamMode::ClientPullPreFetch => 1,
        };
        records.extend((0..requests).map(|_| RequestFrame.into()));

        if records.is_empty() {
            // Flags with nothing to say (enum change before the handshake) stay pending,
            // except the stream-mode marker, which only shapes requests.
            self.pending.remove(PendingChanges::STREAM_MODE);
            return None;
        }
        Some(OutboundBatch { records, flags, revision: self.revision, ping })
    }

    /// Clear what `batch` delivered; call after a successful flush.
    pub fn commit(&mut self, batch: &OutboundBatch, sent_at: Instant) {
        if let Some(id) = batch.ping {
            self.latency.mark_sent(id, sent_at);
        }
        let mut delivered = batch.flags;
        if self.supported.is_none() {
            delivered.remove(PendingChanges::OBJECT_ENUMS);
        }
        if self.revision == batch.revision {
            self.pending.remove(delivered);
        } else {
            // Changed while the batch was in flight; resend next cycle.
            self.pending.remove(delivered & PendingChanges::STREAM_MODE);
        }
    }
}
