//! A client that answers pose queries for a chosen time instead of the latest frame.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::engine::{RetimedPose, Retimer};
use super::pose::{FramePose, NamedSegment, SubjectPose, Transform};
use crate::client::{Client, StreamObserver};
use crate::config::ClientConfig;
use crate::snapshot::{DynamicObjects, SegmentTransform, StaticObjects};
use crate::{Result, StreamError};

/// Feeds the pose history from the pump.
struct HistoryFeed {
    retimer: Arc<Mutex<Retimer>>,
    topology: Mutex<Option<Arc<StaticObjects>>>,
}

impl StreamObserver for HistoryFeed {
    fn on_connect(&self) {
        self.retimer.lock().clear();
        *self.topology.lock() = None;
    }

    fn on_static_objects(&self, objects: &Arc<StaticObjects>) {
        *self.topology.lock() = Some(Arc::clone(objects));
    }

    fn on_dynamic_objects(&self, objects: &Arc<DynamicObjects>) {
        let Some(frame_number) = objects.frame_number() else {
            return;
        };
        let Some(topology) = self.topology.lock().clone() else {
            debug!(frame_number, "No subject topology yet, frame not retimed");
            return;
        };
        let pose = FramePose::from_snapshots(&topology, objects);
        self.retimer.lock().push(frame_number, objects.capture_time(), pose);
    }
}

/// Wraps a [`Client`] and serves poses predicted for a frozen query time.
///
/// Each received frame is stamped with its capture time (receipt time less the server's
/// reported latency and the network estimate). [`update_frame`](Self::update_frame) or
/// [`wait_for_frame`](Self::wait_for_frame) then pick a time, and every query until the
/// next update answers for that same time.
pub struct RetimingClient {
    client: Client,
    retimer: Arc<Mutex<Retimer>>,
    clock: Option<Interval>,
    frozen: Option<RetimedPose>,
}

impl Default for RetimingClient {
    fn default() -> Self {
        Self::from_client(Client::new())
    }
}

impl RetimingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Ok(Self::from_client(Client::with_config(config)?))
    }

    fn from_client(client: Client) -> Self {
        let config = client.config();
        let retimer = Arc::new(Mutex::new(Retimer::new(
            config.history_capacity,
            config.maximum_prediction(),
        )));
        client.add_observer(Arc::new(HistoryFeed {
            retimer: Arc::clone(&retimer),
            topology: Mutex::new(None),
        }));
        client.enable_segment_data();
        Self { client, retimer, clock: None, frozen: None }
    }

    /// The wrapped client, for negotiation and raw frame access.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    /// Connect; with a frame rate, [`wait_for_frame`](Self::wait_for_frame) ticks at it.
    pub async fn connect(&mut self, host: &str, frame_rate: Option<f64>) -> Result<()> {
        let clock = match frame_rate {
            Some(hz) if hz.is_finite() && hz > 0.0 => {
                let mut clock = tokio::time::interval(Duration::from_secs_f64(1.0 / hz));
                clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(clock)
            }
            Some(hz) => return Err(StreamError::config(format!("invalid output frame rate {}", hz))),
            None => None,
        };
        self.frozen = None;
        self.client.connect(host).await?;
        self.clock = clock;
        info!(host, ?frame_rate, "Retiming client connected");
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.client.disconnect().await;
        self.clock = None;
        self.frozen = None;
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn maximum_prediction(&self) -> Duration {
        self.retimer.lock().maximum_prediction()
    }

    pub fn set_maximum_prediction(&self, bound: Duration) {
        self.retimer.lock().set_maximum_prediction(bound);
    }

    /// Freeze the pose at `now + offset` for the following queries.
    pub fn update_frame(&mut self, offset: Duration) -> Result<()> {
        self.freeze(Instant::now() + offset)
    }

    /// Wait for the next output clock tick, then freeze the pose at that moment.
    pub async fn wait_for_frame(&mut self) -> Result<()> {
        let clock = self
            .clock
            .as_mut()
            .ok_or_else(|| StreamError::config("no output frame rate was given at connect"))?;
        clock.tick().await;
        self.freeze(Instant::now())
    }

    fn freeze(&mut self, time: Instant) -> Result<()> {
        self.frozen = None;
        if !self.client.is_connected() {
            return Err(StreamError::NotConnected);
        }
        self.frozen = Some(self.retimer.lock().pose_at(time)?);
        Ok(())
    }

    fn frozen(&self) -> Result<&RetimedPose> {
        self.frozen.as_ref().ok_or(StreamError::NoFrame)
    }

    /// The query time chosen by the last update.
    pub fn time(&self) -> Result<Instant> {
        Ok(self.frozen()?.time)
    }

    /// The received frame at or before the query time.
    pub fn frame_number(&self) -> Result<u32> {
        Ok(self.frozen()?.frame_number)
    }

    pub fn subject_count(&self) -> Result<usize> {
        Ok(self.frozen()?.pose.subjects.len())
    }

    pub fn subject_names(&self) -> Result<Vec<&str>> {
        Ok(self.frozen()?.pose.subjects.iter().map(|s| s.name.as_str()).collect())
    }

    pub fn segment_count(&self, subject: &str) -> Result<usize> {
        Ok(self.subject(subject)?.segments.len())
    }

    pub fn segment_names(&self, subject: &str) -> Result<Vec<&str>> {
        Ok(self.subject(subject)?.segments.iter().map(|s| s.name.as_str()).collect())
    }

    pub fn segment_parent_name(&self, subject: &str, segment: &str) -> Result<Option<&str>> {
        Ok(self.segment(subject, segment)?.parent.as_deref())
    }

    /// Predicted world-space transform, in the client's output axes.
    pub fn segment_global(&self, subject: &str, segment: &str) -> Result<SegmentTransform> {
        let state = self.segment(subject, segment)?.state;
        if state.occluded {
            return Ok(SegmentTransform::occluded());
        }
        let axes = self.client.axis_mapping();
        let served = served(&state.global);
        Ok(SegmentTransform {
            translation: axes.map_translation(served.translation),
            rotation: axes.map_rotation(served.rotation),
            occluded: false,
        })
    }

    /// Predicted parent-relative transform.
    pub fn segment_local(&self, subject: &str, segment: &str) -> Result<SegmentTransform> {
        let state = self.segment(subject, segment)?.state;
        if state.occluded {
            return Ok(SegmentTransform::occluded());
        }
        Ok(served(&state.local))
    }

    fn subject(&self, name: &str) -> Result<&SubjectPose> {
        self.frozen()?
            .pose
            .subject(name)
            .ok_or_else(|| StreamError::InvalidSubjectName { name: name.to_string() })
    }

    fn segment(&self, subject: &str, segment: &str) -> Result<&NamedSegment> {
        self.subject(subject)?
            .segment(segment)
            .ok_or_else(|| StreamError::InvalidSegmentName { name: segment.to_string() })
    }
}

fn served(transform: &Transform) -> SegmentTransform {
    let t = transform.translation;
    SegmentTransform { translation: [t.x, t.y, t.z], rotation: transform.rotation, occluded: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FramedBuffer;
    use crate::protocol::encode_objects;
    use crate::protocol::records::{
        FrameInfo, GlobalSegments, NO_PARENT, ObjectEnums, SegmentInfo, SegmentPose, SubjectInfo,
    };
    use crate::protocol::{ObjectRecord, ObjectTag, ObjectTagSet};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn frame(records: &[ObjectRecord]) -> Vec<u8> {
        let mut buffer = FramedBuffer::new();
        encode_objects(&mut buffer, records);
        buffer.as_slice().to_vec()
    }

    fn moving(frame_id: u32, x: f64) -> Vec<u8> {
        frame(&[
            FrameInfo { frame_id }.into(),
            GlobalSegments {
                subject_id: 1,
                poses: vec![SegmentPose {
                    segment_id: 0,
                    translation: [x, 0.0, 0.0],
                    rotation: [0.0, 0.0, 0.0, 1.0],
                    occluded: false,
                }],
            }
            .into(),
        ])
    }

    #[tokio::test]
    async fn queries_need_a_frozen_frame() {
        let mut client = RetimingClient::new();
        assert!(matches!(client.frame_number(), Err(StreamError::NoFrame)));
        assert!(matches!(client.update_frame(Duration::ZERO), Err(StreamError::NotConnected)));
        assert!(matches!(client.wait_for_frame().await, Err(StreamError::Config { .. })));
        assert!(client.client().is_enabled(crate::DataKind::Segments));
    }

    #[tokio::test]
    async fn rejects_a_bad_frame_rate() {
        let mut client = RetimingClient::new();
        let result = client.connect("127.0.0.1:1", Some(0.0)).await;
        assert!(matches!(result, Err(StreamError::Config { .. })));
    }

    #[tokio::test]
    async fn streamed_frames_are_retimed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let everything: ObjectTagSet =
                ObjectTag::STATIC.into_iter().chain(ObjectTag::DYNAMIC).collect();
            socket.write_all(&frame(&[ObjectEnums { tags: everything }.into()])).await.unwrap();
            let bob = SubjectInfo {
                subject_id: 1,
                name: "Bob".into(),
                segments: vec![SegmentInfo { segment_id: 0, parent_id: NO_PARENT, name: "Pelvis".into() }],
            };
            socket.write_all(&frame(&[bob.into()])).await.unwrap();
            socket.write_all(&moving(1, 0.0)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            socket.write_all(&moving(2, 10.0)).await.unwrap();
            let mut sink = Vec::new();
            let _ = socket.read_to_end(&mut sink).await;
        });

        let config = ClientConfig { port, ..ClientConfig::default() };
        let mut client = RetimingClient::with_config(config).unwrap();
        client.connect("127.0.0.1", Some(100.0)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if client.retimer.lock().history().len() == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        client.update_frame(Duration::ZERO).unwrap();
        assert_eq!(client.frame_number().unwrap(), 2);
        assert_eq!(client.subject_names().unwrap(), vec!["Bob"]);
        assert_eq!(client.segment_parent_name("Bob", "Pelvis").unwrap(), None);
        let pelvis = client.segment_global("Bob", "Pelvis").unwrap();
        assert!(!pelvis.occluded);
        // Moving along +x, so the prediction is at or past the last sample.
        assert!(pelvis.translation[0] >= 10.0);
        assert!(matches!(
            client.segment_global("Bob", "Head"),
            Err(StreamError::InvalidSegmentName { .. })
        ));
        assert!(matches!(
            client.segment_global("Alice", "Pelvis"),
            Err(StreamError::InvalidSubjectName { .. })
        ));

        client.wait_for_frame().await.unwrap();
        assert_eq!(client.frame_number().unwrap(), 2);

        // Far beyond the prediction bound.
        let result = client.update_frame(Duration::from_secs(10));
        assert!(matches!(result, Err(StreamError::LateDataRequested { .. })));
        assert!(matches!(client.frame_number(), Err(StreamError::NoFrame)));

        client.disconnect().await;
        server.await.unwrap();
    }
}
