use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::protocol::Frame;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SocketId(pub u64);

impl SocketId {
    pub fn next() -> Self {
        Self(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub enum Outbound {
    Frame(Frame),
    Close,
}

/// Sending half of one connection. Cloning is cheap; every clone feeds the
/// same writer task.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: SocketId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SocketHandle {}

impl SocketHandle {
    pub fn new(id: SocketId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(SocketId::next(), tx), rx)
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Queues a message. Returns false once the connection is gone.
    pub fn send(&self, kind: &str, payload: Value) -> bool {
        self.send_frame(Frame::new(kind, payload))
    }

    pub fn send_frame(&self, frame: Frame) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
