//! Async client for the CGStream motion-capture streaming protocol.
//!
//! A capture server emits a continuous sequence of typed, length-prefixed binary objects
//! (cameras, subjects and segments, devices, force plates, centroids, video). This crate
//! connects to it over TCP or joins its multicast stream, negotiates which object kinds to
//! receive, and decodes every frame into immutable snapshots that any task can read
//! without blocking the receiver.
//!
//! # Features
//!
//! - **Framed wire codec**: bounds-checked buffer, nested tag/length framing, table-driven
//!   record dispatch with delta ("unchanged since last frame") reconstruction
//! - **Unicast and multicast**: one background pump task per connection, coalesced
//!   control batches, ping-based network latency estimation
//! - **Atomic snapshots**: the latest static and dynamic snapshots are published as whole
//!   `Arc`s through `watch` channels, with callbacks and streams for updates
//! - **Retiming**: predict subject poses at an arbitrary time from a rolling history
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cgstream::CgStream;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> cgstream::Result<()> {
//!     let client = CgStream::connect("mocap-server").await?;
//!     let mut frames = Box::pin(client.dynamic_updates());
//!
//!     while let Some(snapshot) = frames.next().await {
//!         println!("frame {:?}", snapshot.frame_number());
//!     }
//!     Ok(())
//! }
//! ```

// Wire substrate
pub mod buffer;
pub mod protocol;

// Core types and error handling
pub mod config;
mod error;
pub mod snapshot;
pub mod video;

// Connection and streaming
pub mod client;
pub mod retiming;
pub mod transport;

pub use buffer::FramedBuffer;
pub use client::{Client, DataKind, StreamObserver, TimingLog};
pub use config::{ClientConfig, DEFAULT_PORT, StreamMode};
pub use error::*;
pub use protocol::{ObjectTag, ObjectTagSet};
pub use retiming::RetimingClient;
pub use snapshot::{AxisMapping, Direction, DynamicObjects, Frame, SegmentTransform, StaticObjects};
pub use video::{VideoDecoder, VideoHint};

use std::net::Ipv4Addr;

/// Unified entry point for CGStream connections.
///
/// Each method builds a client with default settings and starts it. Use
/// [`Client::with_config`] directly to tune sockets, latency windows or prediction.
///
/// ```rust,no_run
/// use cgstream::CgStream;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> cgstream::Result<()> {
/// let mut retimed = CgStream::connect_retimed("mocap-server:801", 120.0).await?;
/// retimed.wait_for_frame().await?;
/// let pelvis = retimed.segment_global("Bob", "Pelvis")?;
/// # Ok(())
/// # }
/// ```
pub struct CgStream;

impl CgStream {
    /// Connect to a server at `host[:port]`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The host cannot be resolved to an IPv4 address
    /// - Every resolved address refuses the connection
    pub async fn connect(host: &str) -> Result<Client> {
        let mut client = Client::new();
        client.connect(host).await?;
        Ok(client)
    }

    /// Join a multicast (or broadcast) stream as a receive-only client.
    ///
    /// # Errors
    ///
    /// Returns an error if `group` is neither multicast nor `255.255.255.255`, or the
    /// socket cannot be bound or joined.
    pub async fn receive_multicast(group: Ipv4Addr, local: Ipv4Addr, port: u16) -> Result<Client> {
        let mut client = Client::new();
        client.receive_multicast(group, local, port).await?;
        Ok(client)
    }

    /// Connect a retiming client whose output clock runs at `frame_rate` Hz.
    pub async fn connect_retimed(host: &str, frame_rate: f64) -> Result<RetimingClient> {
        let mut client = RetimingClient::new();
        client.connect(host, Some(frame_rate)).await?;
        Ok(client)
    }
}
