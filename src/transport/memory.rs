//! In-memory transport.
//!
//! [`MemoryTransport::pair`] returns the transport a session writes to, the
//! receiver the session reads device bytes from, and a [`MemoryPeer`] that
//! plays the device: it sees every write and can inject incoming bytes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::connection::ConnectionKind;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Default capacity of the incoming channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Transport backed by in-process channels.
#[derive(Debug)]
pub struct MemoryTransport {
    kind: ConnectionKind,
    written: Option<mpsc::UnboundedSender<Bytes>>,
    fail_sends: Arc<AtomicBool>,
}

/// Device side of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryPeer {
    written: mpsc::UnboundedReceiver<Bytes>,
    incoming: mpsc::Sender<Bytes>,
    fail_sends: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Creates a connected transport and its peer.
    #[must_use]
    pub fn pair(kind: ConnectionKind) -> (Self, mpsc::Receiver<Bytes>, MemoryPeer) {
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let fail_sends = Arc::new(AtomicBool::new(false));

        let transport = Self {
            kind,
            written: Some(written_tx),
            fail_sends: Arc::clone(&fail_sends),
        };
        let peer = MemoryPeer {
            written: written_rx,
            incoming: incoming_tx,
            fail_sends,
        };
        (transport, incoming_rx, peer)
    }
}

impl Transport for MemoryTransport {
    fn kind(&self) -> ConnectionKind {
        self.kind
    }

    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let written = self.written.as_ref().ok_or(Error::NotConnected)?;
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(Error::Transport {
                    reason: "write rejected".into(),
                });
            }
            tracing::trace!("memory write: {}", hex::encode(&data));
            written.send(data).map_err(|_| Error::ChannelClosed)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.written = None;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.written.is_some()
    }
}

impl MemoryPeer {
    /// Delivers bytes to the session as if the device sent them.
    pub async fn inject(&self, data: impl Into<Bytes>) -> Result<()> {
        self.incoming
            .send(data.into())
            .await
            .map_err(|_| Error::ChannelSend)
    }

    /// Receives the next write made by the session.
    ///
    /// Returns `None` once the transport is closed or dropped.
    pub async fn next_write(&mut self) -> Option<Bytes> {
        self.written.recv().await
    }

    /// Returns an already-made write without waiting.
    pub fn try_next_write(&mut self) -> Option<Bytes> {
        self.written.try_recv().ok()
    }

    /// Makes subsequent writes fail with a transport error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}
