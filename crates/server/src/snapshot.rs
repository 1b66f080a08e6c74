use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use wall::net::{ServerNetwork, TakeSnapshot, TakeSnapshotRes, kind};
use wall::{Rect, SurfaceSnapshot};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SnapshotError {
    #[error("no client shows {0}")]
    NoClient(Rect),
    #[error("client failed: {0}")]
    Client(String),
    #[error("client sent no image")]
    Empty,
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

pub type SnapshotReply = oneshot::Sender<Result<SurfaceSnapshot, SnapshotError>>;

struct PendingSnapshot {
    reply: SnapshotReply,
    expires_at: Instant,
}

/// Outstanding `takeSnapshot` requests keyed by id.
pub struct SnapshotRequests {
    pending: HashMap<u64, PendingSnapshot>,
    next_id: u64,
    timeout: Duration,
}

impl SnapshotRequests {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 1,
            timeout,
        }
    }

    pub fn request(&mut self, network: &ServerNetwork, rect: Rect, reply: SnapshotReply) {
        let Some(client) = network.find_by_rect(&rect) else {
            let _ = reply.send(Err(SnapshotError::NoClient(rect)));
            return;
        };

        let id = self.next_id;
        self.next_id += 1;
        let request = TakeSnapshot {
            client: rect.serialize(),
            id,
        };
        let payload = serde_json::to_value(&request).unwrap_or(Value::Null);
        if !client.socket.send(kind::TAKE_SNAPSHOT, payload) {
            let _ = reply.send(Err(SnapshotError::Closed));
            return;
        }
        self.pending.insert(
            id,
            PendingSnapshot {
                reply,
                expires_at: Instant::now() + self.timeout,
            },
        );
    }

    pub fn resolve(&mut self, response: TakeSnapshotRes) -> bool {
        let Some(pending) = self.pending.remove(&response.id) else {
            log::debug!("Ignoring snapshot response for unknown request {}", response.id);
            return false;
        };
        let result = match (response.error, response.data, response.width) {
            (Some(error), _, _) => Err(SnapshotError::Client(error)),
            (None, Some(data), Some(width)) if width > 0 => {
                let height = (data.len() / 4) as u32 / width;
                Ok(SurfaceSnapshot {
                    width,
                    height,
                    data,
                })
            }
            _ => Err(SnapshotError::Empty),
        };
        let _ = pending.reply.send(result);
        true
    }

    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.expires_at <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                let _ = pending.reply.send(Err(SnapshotError::Timeout(self.timeout)));
            }
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
