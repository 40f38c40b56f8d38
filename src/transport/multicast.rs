//! Receive-only multicast/broadcast backend.

use futures::FutureExt;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use super::Transport;
use super::address::validate_multicast_address;
use crate::buffer::FramedBuffer;
use crate::config::ClientConfig;
use crate::{Result, StreamError};

/// One datagram is one frame.
pub struct MulticastTransport {
    socket: Option<UdpSocket>,
    group: Ipv4Addr,
    interface: Ipv4Addr,
    max_datagram_size: usize,
}

impl MulticastTransport {
    /// Bind to `port` and subscribe to `group` through the `local` interface.
    ///
    /// The group address is validated before any socket is opened. Must be called from
    /// within a tokio runtime.
    pub fn bind(group: Ipv4Addr, local: Ipv4Addr, port: u16, config: &ClientConfig) -> Result<Self> {
        validate_multicast_address(group)?;
        let fail = |context: &str, e: std::io::Error| StreamError::transport(context, e);

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| fail("socket creation", e))?;
        socket.set_reuse_address(true).map_err(|e| fail("SO_REUSEADDR", e))?;
        socket
            .set_recv_buffer_size(config.receive_buffer_size)
            .map_err(|e| fail("SO_RCVBUF", e))?;
        if group.is_broadcast() {
            socket.set_broadcast(true).map_err(|e| fail("SO_BROADCAST", e))?;
        }

        let endpoint = bind_endpoint(group, local, port);
        socket
            .bind(&SocketAddr::V4(endpoint).into())
            .map_err(|e| fail("multicast bind", e))?;
        if group.is_multicast() {
            socket.join_multicast_v4(&group, &local).map_err(|e| fail("multicast join", e))?;
        }
        socket.set_nonblocking(true).map_err(|e| fail("non-blocking mode", e))?;

        let socket = UdpSocket::from_std(std::net::UdpSocket::from(socket))
            .map_err(|e| fail("runtime registration", e))?;
        debug!(%group, %local, port, %endpoint, "Multicast socket ready");
        Ok(Self::from_socket(socket, group, local, config.max_datagram_size))
    }

    pub(crate) fn from_socket(
        socket: UdpSocket,
        group: Ipv4Addr,
        interface: Ipv4Addr,
        max_datagram_size: usize,
    ) -> Self {
        Self { socket: Some(socket), group, interface, max_datagram_size }
    }

    pub fn group(&self) -> Ipv4Addr {
        self.group
    }
}

/// Windows binds the local interface; POSIX binds the group (or broadcast) address so
/// only that traffic is delivered.
#[cfg(windows)]
fn bind_endpoint(_group: Ipv4Addr, local: Ipv4Addr, port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(local, port)
}

#[cfg(not(windows))]
fn bind_endpoint(group: Ipv4Addr, _local: Ipv4Addr, port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(group, port)
}

#[async_trait::async_trait]
impl Transport for MulticastTransport {
    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    async fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            if self.group.is_multicast() {
                let _ = socket.leave_multicast_v4(self.group, self.interface);
            }
            debug!(group = %self.group, "Multicast socket closed");
        }
    }

    fn data_ready(&self) -> bool {
        let Some(socket) = self.socket.as_ref() else {
            return false;
        };
        let mut probe = [0u8; 1];
        matches!(socket.peek_from(&mut probe).now_or_never(), Some(Ok(_)))
    }

    async fn fill(&mut self, buffer: &mut FramedBuffer) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(StreamError::NotConnected)?;
        buffer.clear();
        let received = socket
            .recv(buffer.region_mut(0, self.max_datagram_size))
            .await
            .map_err(|e| StreamError::transport("datagram read", e))?;
        buffer.set_length(received);
        trace!(bytes = received, "Datagram received");
        Ok(())
    }

    async fn flush(&mut self, _buffer: &mut FramedBuffer) -> Result<()> {
        Err(StreamError::ReceiveOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_objects;
    use crate::protocol::records::FrameInfo;

    #[tokio::test]
    async fn invalid_group_is_rejected_before_socket_creation() {
        let group = Ipv4Addr::new(10, 0, 0, 1);
        let result = MulticastTransport::bind(group, Ipv4Addr::LOCALHOST, 0, &ClientConfig::default());
        assert!(matches!(result, Err(StreamError::InvalidMulticastAddress { .. })));
    }

    #[tokio::test]
    async fn each_datagram_is_one_frame() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();
        let mut transport = MulticastTransport::from_socket(
            receiver,
            Ipv4Addr::BROADCAST,
            Ipv4Addr::LOCALHOST,
            65_507,
        );

        let mut frame = FramedBuffer::new();
        encode_objects(&mut frame, &[FrameInfo { frame_id: 3 }.into()]);
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(frame.as_slice(), target).await.unwrap();

        let mut buffer = FramedBuffer::new();
        transport.fill(&mut buffer).await.unwrap();
        assert_eq!(buffer.as_slice(), frame.as_slice());
        assert_eq!(buffer.offset(), 0);
    }

    #[tokio::test]
    async fn flush_is_refused() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut transport =
            MulticastTransport::from_socket(socket, Ipv4Addr::BROADCAST, Ipv4Addr::LOCALHOST, 1024);
        let mut buffer = FramedBuffer::from_slice(&[1, 2, 3]);
        assert!(matches!(transport.flush(&mut buffer).await, Err(StreamError::ReceiveOnly)));

        transport.close().await;
        assert!(!transport.is_open());
        assert!(!transport.data_ready());
    }
}
