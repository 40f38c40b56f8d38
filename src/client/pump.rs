//! Background frame pump, one task per connection.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::Shared;
use crate::Result;
use crate::buffer::FramedBuffer;
use crate::protocol::{encode_objects, read_object_enums};
use crate::transport::Transport;

const INITIAL_BUFFER: usize = 64 * 1024;

/// What the running task is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionKind {
    Unicast { host: String },
    Multicast { group: Ipv4Addr },
}

/// A spawned pump and the means to stop it.
pub(crate) struct Session {
    pub kind: SessionKind,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the pump and wait for it to close its transport.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Frame pump task failed: {}", e);
        }
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

pub(crate) struct Pump;

impl Pump {
    /// Duplex pump: handshake, then alternate outbound batch and inbound frame.
    pub fn spawn_unicast<T: Transport>(transport: T, shared: Arc<Shared>, host: String) -> Session {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            Self::unicast_task(transport, shared, task_cancel).await;
        });
        Session { kind: SessionKind::Unicast { host }, cancel, task }
    }

    /// Receive-only pump; never writes and never fires the disconnect callback.
    pub fn spawn_multicast<T: Transport>(
        transport: T,
        shared: Arc<Shared>,
        group: Ipv4Addr,
    ) -> Session {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            Self::multicast_task(transport, shared, task_cancel).await;
        });
        Session { kind: SessionKind::Multicast { group }, cancel, task }
    }

    async fn unicast_task<T: Transport>(
        mut transport: T,
        shared: Arc<Shared>,
        cancel: CancellationToken,
    ) {
        info!("Frame pump started");
        let mut buffer = FramedBuffer::with_capacity(INITIAL_BUFFER);
        let mut frames = 0u64;

        let result = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = Self::unicast_loop(&mut transport, &mut buffer, &shared, &mut frames) => result,
        };
        transport.close().await;

        match result {
            Ok(()) => info!(frames, "Frame pump cancelled"),
            Err(e) => warn!(frames, error = %e, "Frame pump stopped"),
        }
        shared.notify_disconnect();
    }

    async fn unicast_loop<T: Transport>(
        transport: &mut T,
        buffer: &mut FramedBuffer,
        shared: &Shared,
        frames: &mut u64,
    ) -> Result<()> {
        transport.fill(buffer).await?;
        let supported = read_object_enums(buffer)?;
        debug!(kinds = supported.len(), "Handshake complete");
        shared.control.lock().set_supported(supported);

        loop {
            Self::send_pending(transport, buffer, shared).await?;
            Self::receive(transport, buffer, shared).await?;
            *frames += 1;
        }
    }

    async fn multicast_task<T: Transport>(
        mut transport: T,
        shared: Arc<Shared>,
        cancel: CancellationToken,
    ) {
        info!("Multicast pump started");
        let mut buffer = FramedBuffer::with_capacity(INITIAL_BUFFER);
        let mut frames = 0u64;

        let result = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = Self::multicast_loop(&mut transport, &mut buffer, &shared, &mut frames) => result,
        };
        transport.close().await;

        match result {
            Ok(()) => info!(frames, "Multicast pump cancelled"),
            Err(e) => warn!(frames, error = %e, "Multicast pump stopped"),
        }
    }

    async fn multicast_loop<T: Transport>(
        transport: &mut T,
        buffer: &mut FramedBuffer,
        shared: &Shared,
        frames: &mut u64,
    ) -> Result<()> {
        loop {
            Self::receive(transport, buffer, shared).await?;
            *frames += 1;
        }
    }

    /// Write this cycle's coalesced control batch, if there is one.
    async fn send_pending<T: Transport>(
        transport: &mut T,
        buffer: &mut FramedBuffer,
        shared: &Shared,
    ) -> Result<()> {
        let frame_waiting = transport.data_ready();
        let Some(batch) = shared.control.lock().prepare(frame_waiting) else {
            return Ok(());
        };

        buffer.clear();
        encode_objects(buffer, batch.records());
        let sent_at = Instant::now();
        transport.flush(buffer).await?;
        trace!(records = batch.records().len(), "Control batch sent");

        shared.control.lock().commit(&batch, sent_at);
        Ok(())
    }

    async fn receive<T: Transport>(
        transport: &mut T,
        buffer: &mut FramedBuffer,
        shared: &Shared,
    ) -> Result<()> {
        transport.fill(buffer).await?;
        shared.dispatch(buffer, Instant::now())
    }
}
