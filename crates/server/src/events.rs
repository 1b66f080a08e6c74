use std::net::SocketAddr;

use wall::Rect;
use wall::net::{DisconnectReason, SocketId};

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnecting {
        id: SocketId,
        addr: SocketAddr,
    },
    ClientJoined {
        id: SocketId,
        rect: Rect,
    },
    ClientRejected {
        id: SocketId,
        reason: String,
    },
    ClientLeft {
        id: SocketId,
        rect: Option<Rect>,
        reason: DisconnectReason,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn log(&self) {
        match self {
            ServerEvent::ClientConnecting { id, addr } => {
                log::debug!("Connection {} from {}", id, addr);
            }
            ServerEvent::ClientJoined { id, rect } => {
                log::info!("Client {} joined showing {}", id, rect);
            }
            ServerEvent::ClientRejected { id, reason } => {
                log::warn!("Client {} rejected: {}", id, reason);
            }
            ServerEvent::ClientLeft { id, rect, reason } => match rect {
                Some(rect) => log::info!("Client {} ({}) left: {}", id, rect, reason.as_str()),
                None => log::debug!("Connection {} closed: {}", id, reason.as_str()),
            },
            ServerEvent::Error { message } => log::error!("{}", message),
        }
    }
}
