//! Peer transport seam and an in-process implementation.

use crate::{OtpBridgeError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

/// Inbound traffic from the peer.
#[derive(Debug)]
pub enum PeerMessage {
    /// Full context pushed by the peer.
    Context(Vec<u8>),
    /// The peer wants our current context; answer through the sender.
    Request(oneshot::Sender<Vec<u8>>),
}

/// Bidirectional channel to the companion device.
///
/// Nothing is delivered until the channel is activated. Contexts pushed
/// before activation are dropped, not queued.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    fn is_activated(&self) -> bool;

    /// Best-effort delivery of a full context, replacing any earlier one.
    async fn push_context(&self, context: Vec<u8>) -> Result<()>;

    /// Ask the peer for its current context. `None` if it cannot answer.
    async fn request_context(&self) -> Result<Option<Vec<u8>>>;

    /// Next inbound message; `None` once the peer is gone.
    async fn recv(&self) -> Option<PeerMessage>;
}

/// One end of an in-process channel pair.
pub struct MemoryChannel {
    activated: Arc<AtomicBool>,
    outbox: mpsc::UnboundedSender<PeerMessage>,
    inbox: Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
}

impl MemoryChannel {
    /// Two connected ends sharing one activation switch (initially off).
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let activated = Arc::new(AtomicBool::new(false));
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = MemoryChannel {
            activated: activated.clone(),
            outbox: b_tx,
            inbox: Mutex::new(a_rx),
        };
        let b = MemoryChannel {
            activated,
            outbox: a_tx,
            inbox: Mutex::new(b_rx),
        };
        (a, b)
    }

    pub fn set_activated(&self, activated: bool) {
        self.activated.store(activated, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerChannel for MemoryChannel {
    fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    async fn push_context(&self, context: Vec<u8>) -> Result<()> {
        if !self.is_activated() {
            debug!("Channel not activated, dropping {} byte context", context.len());
            return Ok(());
        }
        self.outbox
            .send(PeerMessage::Context(context))
            .map_err(|_| OtpBridgeError::Transport("peer disconnected".to_string()))
    }

    async fn request_context(&self) -> Result<Option<Vec<u8>>> {
        if !self.is_activated() {
            return Ok(None);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.outbox
            .send(PeerMessage::Request(reply_tx))
            .map_err(|_| OtpBridgeError::Transport("peer disconnected".to_string()))?;
        Ok(reply_rx.await.ok())
    }

    async fn recv(&self) -> Option<PeerMessage> {
        self.inbox.lock().await.recv().await
    }
}
