//! The streaming client: connection lifecycle, control state and snapshot publication.
//!
//! A [`Client`] owns at most one background pump task. The pump decodes each frame into
//! fresh [`StaticObjects`]/[`DynamicObjects`] and publishes them through `watch` channels;
//! callers read the latest pair without ever contending with the pump.
//!
//! ```rust,no_run
//! use cgstream::Client;
//!
//! # #[tokio::main]
//! # async fn main() -> cgstream::Result<()> {
//! let mut client = Client::new();
//! client.enable_segment_data();
//! client.connect("localhost:801").await?;
//!
//! let frame = client.frame()?;
//! for subject in frame.subject_names() {
//!     println!("{} at frame {}", subject, frame.frame_number()?);
//! }
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod control;
mod latency;
mod observer;
mod pump;
mod timing_log;


pub use control::DataKind;
pub use latency::{LatencyTracker, RttWindow};
pub use observer::StreamObserver;
pub use timing_log::TimingLog;

use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, trace};

use crate::buffer::FramedBuffer;
use crate::config::{ClientConfig, StreamMode};
use crate::protocol::{DecodeContext, DecodedFrame, ObjectTag, ObjectTagSet, decode_frame};
use crate::snapshot::{AxisMapping, Direction, DynamicObjects, Frame, StaticObjects};
use crate::transport::address::{resolve_ipv4, split_host_port, validate_multicast_address};
use crate::transport::{MulticastTransport, StreamTransport};
use crate::video::{VideoDecoder, VideoHint};
use crate::{Result, StreamError};
use control::ControlState;
use pump::{Pump, Session, SessionKind};

/// The most recent static and dynamic snapshots, published together.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshots {
    pub static_objects: Option<Arc<StaticObjects>>,
    pub dynamic_objects: Option<Arc<DynamicObjects>>,
}

#[derive(Clone, Default)]
struct VideoSettings {
    hint: VideoHint,
    decoder: Option<Arc<dyn VideoDecoder>>,
}

/// State shared between the caller-facing [`Client`] and its pump task.
pub(crate) struct Shared {
    config: ClientConfig,
    pub control: Mutex<ControlState>,
    timing_log: Mutex<Option<TimingLog>>,
    frames: watch::Sender<Snapshots>,
    statics: watch::Sender<Option<Arc<StaticObjects>>>,
    dynamics: watch::Sender<Option<Arc<DynamicObjects>>>,
    observers: RwLock<Vec<Arc<dyn StreamObserver>>>,
    video: RwLock<VideoSettings>,
}

impl Shared {
    pub fn new(config: ClientConfig) -> Self {
        let control = ControlState::new(config.rtt_window, config.stream_mode);
        Self {
            control: Mutex::new(control),
            timing_log: Mutex::new(None),
            frames: watch::Sender::new(Snapshots::default()),
            statics: watch::Sender::new(None),
            dynamics: watch::Sender::new(None),
            observers: RwLock::new(Vec::new()),
            video: RwLock::new(VideoSettings::default()),
            config,
        }
    }

    pub fn snapshots(&self) -> Snapshots {
        self.frames.borrow().clone()
    }

    /// Decode one received frame and publish whatever it produced.
    pub fn dispatch(&self, buffer: &mut FramedBuffer, received_at: Instant) -> Result<()> {
        let previous = self.snapshots();
        let video = self.video.read().clone();
        let context = DecodeContext {
            previous_static: previous.static_objects.as_deref(),
            previous_dynamic: previous.dynamic_objects.as_deref(),
            received_at,
            video_hint: video.hint,
            video_decoder: video.decoder.as_deref(),
        };
        let DecodedFrame { static_objects, mut dynamic_objects, ping_replies, object_enums } =
            decode_frame(buffer, context)?;

        let network_latency = {
            let mut control = self.control.lock();
            for id in ping_replies {
                if let Some(rtt) = control.latency.reply(id, received_at) {
                    trace!(id, rtt_us = rtt.as_micros() as u64, "Ping reply");
                }
            }
            if let Some(supported) = object_enums {
                debug!(kinds = supported.len(), "Server updated its supported objects");
                control.set_supported(supported);
            }
            control.latency.network_latency()
        };

        if let Some(dynamics) = dynamic_objects.as_mut() {
            dynamics.network_latency = network_latency.map(std::time::Duration::from_secs_f64);
        }
        self.publish(static_objects, dynamic_objects);
        Ok(())
    }

    fn publish(&self, static_objects: Option<StaticObjects>, dynamic_objects: Option<DynamicObjects>) {
        if static_objects.is_none() && dynamic_objects.is_none() {
            return;
        }
        let static_objects = static_objects.map(Arc::new);
        let dynamic_objects = dynamic_objects.map(Arc::new);

        // One replace for the pair, so `frame()` never sees a new static with an old dynamic.
        self.frames.send_modify(|current| {
            if let Some(statics) = &static_objects {
                current.static_objects = Some(Arc::clone(statics));
            }
            if let Some(dynamics) = &dynamic_objects {
                current.dynamic_objects = Some(Arc::clone(dynamics));
            }
        });

        if let Some(statics) = &static_objects {
            self.statics.send_replace(Some(Arc::clone(statics)));
        }
        if let Some(dynamics) = &dynamic_objects {
            self.dynamics.send_replace(Some(Arc::clone(dynamics)));
            if let (Some(log), Some(frame)) = (self.timing_log.lock().as_ref(), dynamics.frame_number()) {
                log.record(frame);
            }
        }

        let observers = self.observers.read().clone();
        for observer in &observers {
            if let Some(statics) = &static_objects {
                observer.on_static_objects(statics);
            }
            if let Some(dynamics) = &dynamic_objects {
                observer.on_dynamic_objects(dynamics);
            }
        }
    }

    /// Drop snapshots and per-connection control state before a new session starts.
    fn reset_session(&self) {
        self.control.lock().reset_session(self.config.rtt_window);
        self.frames.send_replace(Snapshots::default());
        self.statics.send_replace(None);
        self.dynamics.send_replace(None);
    }

    fn notify_connect(&self) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_connect();
        }
    }

    pub fn notify_disconnect(&self) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_disconnect();
        }
    }
}

/// Client for a CGStream capture server.
///
/// Mutators that only touch control state take `&self`; they are coalesced and sent by
/// the pump on its next cycle. Connection changes take `&mut self`.
pub struct Client {
    shared: Arc<Shared>,
    session: Option<Session>,
    axes: AxisMapping,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::from_shared(Shared::new(ClientConfig::default()))
    }

    /// Create a client with explicit settings; the configuration is validated first.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_shared(Shared::new(config)))
    }

    fn from_shared(shared: Shared) -> Self {
        Self { shared: Arc::new(shared), session: None, axes: AxisMapping::default() }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Register callbacks; they run on the pump task.
    pub fn add_observer(&self, observer: Arc<dyn StreamObserver>) {
        self.shared.observers.write().push(observer);
    }

    // ---- Connection lifecycle ----

    /// Connect to `host[:port]`, trying each IPv4 address in resolver order.
    ///
    /// Any existing connection is closed first. If every candidate fails, the disconnect
    /// callback fires and the last failure is returned.
    pub async fn connect(&mut self, host: &str) -> Result<()> {
        let config = self.shared.config.clone();
        self.connect_with(host, config).await
    }

    /// Like [`connect`](Self::connect), binding the socket to a local adapter address.
    pub async fn connect_with_adapter(&mut self, host: &str, adapter: Ipv4Addr) -> Result<()> {
        let mut config = self.shared.config.clone();
        config.local_adapter = Some(adapter);
        self.connect_with(host, config).await
    }

    async fn connect_with(&mut self, host: &str, config: ClientConfig) -> Result<()> {
        self.disconnect().await;
        let (name, port) = split_host_port(host, config.port)?;
        info!(host = %name, port, "Connecting");

        let candidates = match resolve_ipv4(&name, port).await {
            Ok(candidates) => candidates,
            Err(e) => {
                self.shared.notify_disconnect();
                return Err(e);
            }
        };

        let mut last_error = None;
        for peer in candidates {
            match StreamTransport::connect(peer, &config).await {
                Ok(transport) => {
                    info!(%peer, "Connected");
                    self.shared.reset_session();
                    self.shared.notify_connect();
                    self.session =
                        Some(Pump::spawn_unicast(transport, Arc::clone(&self.shared), host.to_string()));
                    return Ok(());
                }
                Err(e) => {
                    debug!(%peer, error = %e, "Connection attempt failed");
                    last_error = Some(e);
                }
            }
        }

        self.shared.notify_disconnect();
        Err(last_error.unwrap_or_else(|| StreamError::connection_failed(host, "no candidates")))
    }

    /// Subscribe to a multicast (or broadcast) stream as a receive-only client.
    ///
    /// The address is checked before anything else, so an invalid group leaves an existing
    /// connection untouched.
    pub async fn receive_multicast(&mut self, group: Ipv4Addr, local: Ipv4Addr, port: u16) -> Result<()> {
        validate_multicast_address(group)?;
        self.disconnect().await;
        let transport = MulticastTransport::bind(group, local, port, &self.shared.config)?;
        info!(%group, %local, port, "Receiving multicast");
        self.shared.reset_session();
        self.session = Some(Pump::spawn_multicast(transport, Arc::clone(&self.shared), group));
        Ok(())
    }

    /// Close the active connection and wait for the pump to exit. Idempotent.
    pub async fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let kind = session.kind.clone();
        session.stop().await;
        info!(?kind, "Disconnected");
    }

    /// Whether a pump is running; a failed connection reads as disconnected.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_running)
    }

    /// The host passed to `connect`, while the connection is up.
    pub fn host(&self) -> Option<&str> {
        match self.live_session()?.kind {
            SessionKind::Unicast { ref host } => Some(host),
            SessionKind::Multicast { .. } => None,
        }
    }

    pub fn multicast_group(&self) -> Option<Ipv4Addr> {
        match self.live_session()?.kind {
            SessionKind::Multicast { group } => Some(group),
            SessionKind::Unicast { .. } => None,
        }
    }

    fn live_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|s| s.is_running())
    }

    fn require_duplex(&self) -> Result<()> {
        match self.live_session() {
            None => Err(StreamError::NotConnected),
            Some(session) if matches!(session.kind, SessionKind::Multicast { .. }) => {
                Err(StreamError::ReceiveOnly)
            }
            Some(_) => Ok(()),
        }
    }

    // ---- Object negotiation ----

    pub fn enable(&self, kind: DataKind) {
        self.shared.control.lock().set_enabled(kind, true);
    }

    pub fn disable(&self, kind: DataKind) {
        self.shared.control.lock().set_enabled(kind, false);
    }

    pub fn is_enabled(&self, kind: DataKind) -> bool {
        self.shared.control.lock().is_enabled(kind)
    }

    pub fn enable_segment_data(&self) {
        self.enable(DataKind::Segments);
    }

    pub fn disable_segment_data(&self) {
        self.disable(DataKind::Segments);
    }

    pub fn enable_centroid_data(&self) {
        self.enable(DataKind::Centroids);
    }

    pub fn disable_centroid_data(&self) {
        self.disable(DataKind::Centroids);
    }

    pub fn enable_device_data(&self) {
        self.enable(DataKind::Devices);
    }

    pub fn disable_device_data(&self) {
        self.disable(DataKind::Devices);
    }

    pub fn enable_video_data(&self) {
        self.enable(DataKind::Video);
    }

    pub fn disable_video_data(&self) {
        self.disable(DataKind::Video);
    }

    pub fn enable_marker_data(&self) {
        self.enable(DataKind::UnlabeledMarkers);
    }

    pub fn disable_marker_data(&self) {
        self.disable(DataKind::UnlabeledMarkers);
    }

    /// Replace the wanted kinds wholesale. The base kinds are always requested.
    pub fn set_wanted_objects(&self, tags: impl IntoIterator<Item = ObjectTag>) {
        self.shared.control.lock().set_wanted(tags);
    }

    /// Kinds the caller wants, whether or not the server supports them.
    pub fn wanted_objects(&self) -> ObjectTagSet {
        self.shared.control.lock().wanted().clone()
    }

    /// What the server said it can produce, once the handshake is done.
    pub fn server_objects(&self) -> Option<ObjectTagSet> {
        self.shared.control.lock().supported().cloned()
    }

    /// Wanted ∩ supported.
    pub fn requested_objects(&self) -> Option<ObjectTagSet> {
        self.shared.control.lock().requested()
    }

    /// Restrict `tag` to the given IDs; an empty list lifts the restriction.
    pub fn set_filter(&self, tag: ObjectTag, ids: Vec<u32>) {
        self.shared.control.lock().set_filter(tag, ids);
    }

    /// Switch haptic feedback for a named device in the latest static snapshot.
    pub fn set_haptic_feedback(&self, device: &str, enabled: bool) -> Result<()> {
        self.require_duplex()?;
        let device_id = self
            .latest_static()
            .and_then(|statics| statics.device(device).map(|d| d.device_id))
            .ok_or_else(|| StreamError::InvalidDeviceName { name: device.to_string() })?;
        self.shared.control.lock().set_haptic(device_id, enabled);
        Ok(())
    }

    pub fn set_stream_mode(&self, mode: StreamMode) {
        self.shared.control.lock().set_stream_mode(mode);
    }

    pub fn stream_mode(&self) -> StreamMode {
        self.shared.control.lock().stream_mode()
    }

    // ---- Latency ----

    /// Queue a ping for the next outbound batch; returns its ID.
    pub fn send_ping(&self) -> Result<u32> {
        self.require_duplex()?;
        Ok(self.shared.control.lock().latency.request_ping())
    }

    /// One-way network latency in seconds, once the round-trip window has filled.
    pub fn network_latency(&self) -> Option<f64> {
        self.shared.control.lock().latency.network_latency()
    }

    // ---- Output settings ----

    /// Choose the output coordinate system used by [`Frame`] accessors.
    pub fn set_axis_mapping(&mut self, x: Direction, y: Direction, z: Direction) -> Result<()> {
        self.axes = AxisMapping::new(x, y, z)?;
        Ok(())
    }

    pub fn axis_mapping(&self) -> AxisMapping {
        self.axes
    }

    pub fn set_video_hint(&self, hint: VideoHint) {
        self.shared.video.write().hint = hint;
    }

    pub fn set_video_decoder(&self, decoder: Arc<dyn VideoDecoder>) {
        self.shared.video.write().decoder = Some(decoder);
    }

    // ---- Snapshots ----

    /// Freeze the latest snapshot pair for querying.
    pub fn frame(&self) -> Result<Frame> {
        if !self.is_connected() {
            return Err(StreamError::NotConnected);
        }
        let Snapshots { static_objects, dynamic_objects } = self.shared.snapshots();
        let dynamic_objects = dynamic_objects.ok_or(StreamError::NoFrame)?;
        let static_objects = static_objects.unwrap_or_default();
        Ok(Frame::new(static_objects, dynamic_objects, self.axes))
    }

    pub fn latest_static(&self) -> Option<Arc<StaticObjects>> {
        self.shared.statics.borrow().clone()
    }

    pub fn latest_dynamic(&self) -> Option<Arc<DynamicObjects>> {
        self.shared.dynamics.borrow().clone()
    }

    /// Static snapshots as they are published, starting with the current one if any.
    pub fn static_updates(&self) -> impl Stream<Item = Arc<StaticObjects>> + 'static {
        WatchStream::new(self.shared.statics.subscribe()).filter_map(|opt| async move { opt })
    }

    /// Dynamic snapshots as they are published. A slow consumer skips to the newest.
    pub fn dynamic_updates(&self) -> impl Stream<Item = Arc<DynamicObjects>> + 'static {
        WatchStream::new(self.shared.dynamics.subscribe()).filter_map(|opt| async move { opt })
    }

    // ---- Timing log ----

    /// Start logging frame arrivals to a CSV file, replacing any running log.
    pub async fn start_timing_log(&self, path: impl AsRef<Path>) -> Result<()> {
        let log = TimingLog::create(path).await?;
        let previous = self.shared.timing_log.lock().replace(log);
        if let Some(previous) = previous {
            previous.finish().await?;
        }
        Ok(())
    }

    /// Stop the running log; returns the number of lines written.
    pub async fn stop_timing_log(&self) -> Result<Option<u64>> {
        let log = self.shared.timing_log.lock().take();
        match log {
            Some(log) => Ok(Some(log.finish().await?)),
            None => Ok(None),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            debug!("Dropping client with an active session");
            session.abort();
        }
    }
}
