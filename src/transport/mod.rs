//! Transport trait for frame-oriented sockets.

pub mod address;
mod multicast;
mod stream;

pub use multicast::MulticastTransport;
pub use stream::StreamTransport;

use crate::Result;
use crate::buffer::FramedBuffer;

/// A socket that moves whole frames.
///
/// Backends differ in how they find frame boundaries. A reliable stream reads a header
/// and then exactly the declared payload; a datagram socket treats each datagram as one
/// frame. Either way `fill` only returns once a complete frame is in the buffer, and any
/// error leaves the transport unusable.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    fn is_open(&self) -> bool;

    /// Shut down both directions and close, ignoring shutdown errors. Idempotent.
    async fn close(&mut self);

    /// Whether bytes can be read without waiting.
    fn data_ready(&self) -> bool;

    /// Replace the buffer's contents with the next complete frame; cursor at zero.
    async fn fill(&mut self, buffer: &mut FramedBuffer) -> Result<()>;

    /// Write the buffer's whole logical length, then clear it.
    ///
    /// Receive-only transports fail with [`crate::StreamError::ReceiveOnly`].
    async fn flush(&mut self, buffer: &mut FramedBuffer) -> Result<()>;
}
