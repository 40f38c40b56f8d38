//! Reliable stream backend.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr, SocketAddrV4};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, trace};

use super::Transport;
use crate::buffer::FramedBuffer;
use crate::config::ClientConfig;
use crate::protocol::OBJECT_HEADER_SIZE;
use crate::{Result, StreamError};

/// Duplex TCP connection to a server.
pub struct StreamTransport {
    stream: Option<TcpStream>,
    peer: SocketAddrV4,
    max_frame_size: usize,
}

impl StreamTransport {
    /// Open a socket with the configured options and connect it to `peer`.
    pub async fn connect(peer: SocketAddrV4, config: &ClientConfig) -> Result<Self> {
        let fail = |reason: &str, e: std::io::Error| {
            StreamError::connection_failed_with_source(peer.to_string(), reason, Box::new(e))
        };

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| fail("socket creation failed", e))?;
        socket.set_nodelay(true).map_err(|e| fail("TCP_NODELAY", e))?;
        socket.set_reuse_address(true).map_err(|e| fail("SO_REUSEADDR", e))?;
        socket
            .set_recv_buffer_size(config.receive_buffer_size)
            .map_err(|e| fail("SO_RCVBUF", e))?;
        socket.set_linger(Some(config.linger())).map_err(|e| fail("SO_LINGER", e))?;
        if let Some(adapter) = config.local_adapter {
            socket
                .bind(&SocketAddr::from((adapter, 0)).into())
                .map_err(|e| fail("bind to local adapter failed", e))?;
            debug!(%adapter, "Bound to local adapter");
        }
        socket.set_nonblocking(true).map_err(|e| fail("non-blocking mode", e))?;

        let stream = TcpSocket::from_std_stream(std::net::TcpStream::from(socket))
            .connect(SocketAddr::V4(peer))
            .await
            .map_err(|e| fail("connect failed", e))?;

        Ok(Self { stream: Some(stream), peer, max_frame_size: config.max_frame_size })
    }

    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(StreamError::NotConnected)
    }
}

#[async_trait::async_trait]
impl Transport for StreamTransport {
    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = SockRef::from(&stream).shutdown(Shutdown::Both);
            debug!(peer = %self.peer, "Stream closed");
        }
    }

    /// Asks the kernel directly, so bytes that arrived before the runtime registered
    /// readiness still count. The socket is non-blocking; no data is `WouldBlock`.
    fn data_ready(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };
        let mut probe = [MaybeUninit::<u8>::uninit(); 1];
        matches!(SockRef::from(stream).peek(&mut probe), Ok(n) if n > 0)
    }

    async fn fill(&mut self, buffer: &mut FramedBuffer) -> Result<()> {
        let max_frame_size = self.max_frame_size;
        let stream = self.stream()?;
        buffer.clear();

        // TCP has no frame boundaries: header first, then exactly the declared payload.
        stream
            .read_exact(buffer.region_mut(0, OBJECT_HEADER_SIZE))
            .await
            .map_err(|e| StreamError::transport("frame header read", e))?;
        buffer.set_offset(4)?;
        let length = buffer.read::<u32>()? as usize;
        if length > max_frame_size {
            return Err(StreamError::protocol(
                "frame header",
                format!("declared length {} exceeds limit {}", length, max_frame_size),
            ));
        }
        stream
            .read_exact(buffer.region_mut(OBJECT_HEADER_SIZE, length))
            .await
            .map_err(|e| StreamError::transport("frame payload read", e))?;

        buffer.set_offset(0)?;
        trace!(bytes = buffer.len(), "Frame received");
        Ok(())
    }

    async fn flush(&mut self, buffer: &mut FramedBuffer) -> Result<()> {
        let stream = self.stream()?;
        stream
            .write_all(buffer.as_slice())
            .await
            .map_err(|e| StreamError::transport("frame write", e))?;
        trace!(bytes = buffer.len(), "Frame sent");
        buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::records::FrameInfo;
    use crate::protocol::{ObjectTag, encode_objects};
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, SocketAddrV4) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let SocketAddr::V4(addr) = listener.local_addr().unwrap() else { unreachable!() };
        (listener, addr)
    }

    fn frame_bytes() -> Vec<u8> {
        let mut buffer = FramedBuffer::new();
        encode_objects(&mut buffer, &[FrameInfo { frame_id: 12 }.into()]);
        buffer.as_slice().to_vec()
    }

    #[tokio::test]
    async fn fill_reassembles_split_frames() {
        let (listener, addr) = listener().await;
        let bytes = frame_bytes();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Header split across writes, payload trickled in.
            socket.write_all(&bytes[..3]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            socket.write_all(&bytes[3..10]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            socket.write_all(&bytes[10..]).await.unwrap();
            bytes
        });

        let mut transport = StreamTransport::connect(addr, &ClientConfig::default()).await.unwrap();
        let mut buffer = FramedBuffer::new();
        transport.fill(&mut buffer).await.unwrap();
        let sent = server.await.unwrap();
        assert_eq!(buffer.as_slice(), &sent[..]);
        assert_eq!(buffer.offset(), 0);
    }

    #[tokio::test]
    async fn data_ready_sees_buffered_bytes() {
        let (listener, addr) = listener().await;
        let (send_tx, send_rx) = tokio::sync::oneshot::channel::<()>();
        let bytes = frame_bytes();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = send_rx.await;
            socket.write_all(&bytes).await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let mut transport = StreamTransport::connect(addr, &ClientConfig::default()).await.unwrap();
        assert!(!transport.data_ready());

        send_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !transport.data_ready() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        // Peeking leaves the frame in place.
        assert!(transport.data_ready());

        let mut buffer = FramedBuffer::new();
        transport.fill(&mut buffer).await.unwrap();
        assert!(!transport.data_ready());
    }

    #[tokio::test]
    async fn truncated_frame_fails_fill() {
        let (listener, addr) = listener().await;
        let bytes = frame_bytes();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&bytes[..bytes.len() - 1]).await.unwrap();
        });

        let mut transport = StreamTransport::connect(addr, &ClientConfig::default()).await.unwrap();
        let mut buffer = FramedBuffer::new();
        assert!(matches!(
            transport.fill(&mut buffer).await,
            Err(StreamError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected_before_reading() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&u32::from(ObjectTag::Objects).to_le_bytes()).await.unwrap();
            socket.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut transport = StreamTransport::connect(addr, &ClientConfig::default()).await.unwrap();
        let mut buffer = FramedBuffer::new();
        assert!(matches!(transport.fill(&mut buffer).await, Err(StreamError::Protocol { .. })));
    }

    #[tokio::test]
    async fn flush_writes_and_clears() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = vec![0u8; 12];
            socket.read_exact(&mut received).await.unwrap();
            received
        });

        let mut transport = StreamTransport::connect(addr, &ClientConfig::default()).await.unwrap();
        let mut buffer = FramedBuffer::new();
        encode_objects(&mut buffer, &[]);
        buffer.write(&7u32);
        transport.flush(&mut buffer).await.unwrap();
        assert!(buffer.is_empty());
        assert_eq!(&server.await.unwrap()[8..12], &7u32.to_le_bytes());

        transport.close().await;
        assert!(!transport.is_open());
        assert!(matches!(transport.flush(&mut buffer).await, Err(StreamError::NotConnected)));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let (listener, addr) = listener().await;
        drop(listener);
        let result = StreamTransport::connect(addr, &ClientConfig::default()).await;
        assert!(matches!(result, Err(StreamError::Connection { .. })));
    }
}
