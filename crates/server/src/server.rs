use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};

use wall::module::{ModuleLibrary, Schedule, ServerModules};
use wall::net::{
    Broadcast, ClientRegistry, ClientStart, Frame, Inbound, PeerRegister, RecordError,
    ServerNetwork, SocketHandle, TakeSnapshotRes, kind, spawn_connection,
};
use wall::state::StateStore;
use wall::{Rect, SharedClock, SurfaceSnapshot};

use crate::config::ServerConfig;
use crate::driver::ModuleDriver;
use crate::errors::ErrorLog;
use crate::events::ServerEvent;
use crate::peer::PeerRelay;
use crate::snapshot::{SnapshotError, SnapshotRequests};

#[derive(Debug)]
pub enum ServerCommand {
    PlayModule(String),
    SkipAhead,
    FadeToBlack,
    Status,
    TakeSnapshot {
        rect: Rect,
        reply: oneshot::Sender<Result<SurfaceSnapshot, SnapshotError>>,
    },
}

/// Control surface for a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    commands: mpsc::UnboundedSender<ServerCommand>,
}

impl ServerHandle {
    pub fn send(&self, command: ServerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub async fn take_snapshot(&self, rect: Rect) -> Result<SurfaceSnapshot, SnapshotError> {
        let (reply, rx) = oneshot::channel();
        if !self.send(ServerCommand::TakeSnapshot { rect, reply }) {
            return Err(SnapshotError::Closed);
        }
        rx.await.unwrap_or(Err(SnapshotError::Closed))
    }
}

pub struct WallServer {
    listener: TcpListener,
    config: ServerConfig,
    clock: SharedClock,
    network: Arc<ServerNetwork>,
    state: StateStore,
    driver: ModuleDriver,
    peers: PeerRelay,
    errors: ErrorLog,
    snapshots: SnapshotRequests,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    commands_tx: mpsc::UnboundedSender<ServerCommand>,
    commands_rx: mpsc::UnboundedReceiver<ServerCommand>,
    pending_events: VecDeque<ServerEvent>,
    last_tick_ms: f64,
}

impl WallServer {
    pub async fn bind(
        config: ServerConfig,
        library: ModuleLibrary,
        schedule: Schedule,
        modules: ServerModules,
        clock: SharedClock,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        let network = Arc::new(ServerNetwork::new(ClientRegistry::new(config.max_clients)));
        let state = StateStore::new(network.clone());
        let driver = ModuleDriver::new(
            config.driver.clone(),
            library,
            schedule,
            modules,
            Arc::clone(&network),
            state.clone(),
            Arc::clone(&clock),
            config.wall,
        );
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        Ok(Self {
            listener,
            snapshots: SnapshotRequests::new(config.snapshot_timeout),
            last_tick_ms: clock.now_ms(),
            config,
            clock,
            network,
            state,
            driver,
            peers: PeerRelay::new(),
            errors: ErrorLog::default(),
            inbound_tx,
            inbound_rx,
            commands_tx,
            commands_rx,
            pending_events: VecDeque::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            commands: self.commands_tx.clone(),
        }
    }

    #[cfg(test)]
    pub fn network(&self) -> &Arc<ServerNetwork> {
        &self.network
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut tick = interval(self.config.tick_duration());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut flush = interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut time = interval(self.config.time_interval);
        time.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.driver.start();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let socket = spawn_connection(stream, self.inbound_tx.clone());
                        self.pending_events.push_back(ServerEvent::ClientConnecting {
                            id: socket.id(),
                            addr,
                        });
                    }
                    Err(e) => self.pending_events.push_back(ServerEvent::Error {
                        message: format!("Accept failed: {}", e),
                    }),
                },
                Some(inbound) = self.inbound_rx.recv() => self.handle_inbound(inbound),
                Some(command) = self.commands_rx.recv() => self.handle_command(command),
                Some(joined) = self.driver.next_prepared(), if self.driver.is_preparing() => {
                    self.driver.on_prepared(joined);
                }
                _ = tick.tick() => self.tick(),
                _ = flush.tick() => {
                    self.state.flush();
                }
                _ = time.tick() => self.broadcast_time(),
            }

            for event in self.drain_events() {
                event.log();
            }
        }

        log::info!("Shutting down");
        self.driver.shutdown();
        for client in self.network.clients() {
            client.socket.close();
        }
    }

    fn tick(&mut self) {
        let now = self.clock.now_ms();
        let delta = now - self.last_tick_ms;
        self.last_tick_ms = now;

        let started = Instant::now();
        self.driver.tick(now, delta);
        let elapsed = started.elapsed();
        if elapsed > self.config.tick_duration() {
            log::warn!(
                "Module tick took {:?}, over the {:?} budget",
                elapsed,
                self.config.tick_duration()
            );
        }

        self.snapshots.expire(Instant::now());
    }

    fn broadcast_time(&self) {
        self.network.broadcast(kind::TIME, self.time_payload());
    }

    fn time_payload(&self) -> serde_json::Value {
        json!({ "time": self.clock.now_ms() })
    }

    pub fn handle_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::PlayModule(name) => {
                self.driver.play_module(&name);
            }
            ServerCommand::SkipAhead => {
                self.driver.skip_ahead();
            }
            ServerCommand::FadeToBlack => {
                self.driver.fade_to_black();
            }
            ServerCommand::Status => self.log_status(),
            ServerCommand::TakeSnapshot { rect, reply } => {
                self.snapshots.request(&self.network, rect, reply);
            }
        }
    }

    pub fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Frame { socket, frame } => self.handle_frame(socket, frame),
            Inbound::Disconnected { id, reason } => {
                let record = self.network.unregister(id);
                let forgotten = self.peers.forget(id);
                if forgotten > 0 {
                    log::debug!("Forgot {} peers on {}", forgotten, id);
                }
                self.pending_events.push_back(ServerEvent::ClientLeft {
                    id,
                    rect: record.map(|r| r.rect),
                    reason,
                });
            }
        }
    }

    fn handle_frame(&mut self, socket: SocketHandle, frame: Frame) {
        match frame.kind.as_str() {
            kind::CLIENT_START => self.register_client(socket, &frame),
            kind::RECORD_ERROR => match frame.decode::<RecordError>() {
                Ok(error) => self.errors.record(self.clock.now_ms(), error),
                Err(e) => log::warn!("{}: {}", socket.id(), e),
            },
            kind::TAKE_SNAPSHOT_RES => match frame.decode::<TakeSnapshotRes>() {
                Ok(response) => {
                    self.snapshots.resolve(response);
                }
                Err(e) => log::warn!("{}: {}", socket.id(), e),
            },
            kind::PEER_REGISTER => match frame.decode::<PeerRegister>() {
                Ok(register) => {
                    self.peers.register(register.id, socket);
                }
                Err(e) => log::warn!("{}: {}", socket.id(), e),
            },
            kind::PEER_OFFER | kind::PEER_ANSWER | kind::PEER_ICE_CANDIDATE => {
                self.peers.forward(&frame.kind, &frame.payload);
            }
            other => {
                if self.network.dispatch(other, &frame.payload, &socket) == 0 {
                    log::debug!("{}: no handler for {}", socket.id(), other);
                }
            }
        }
    }

    fn register_client(&mut self, socket: SocketHandle, frame: &Frame) {
        let id = socket.id();
        let start = match frame.decode::<ClientStart>() {
            Ok(start) => start,
            Err(e) => {
                socket.close();
                self.pending_events.push_back(ServerEvent::ClientRejected {
                    id,
                    reason: e.to_string(),
                });
                return;
            }
        };

        match self.network.register(&start, socket) {
            Ok(record) => {
                record.socket.send(kind::TIME, self.time_payload());
                self.driver.client_joined(&record);
                self.pending_events.push_back(ServerEvent::ClientJoined {
                    id,
                    rect: record.rect,
                });
            }
            Err(e) => self.pending_events.push_back(ServerEvent::ClientRejected {
                id,
                reason: e.to_string(),
            }),
        }
    }

    fn log_status(&self) {
        let next = match self.driver.next_advance_at() {
            Some(at) => format!("in {:.1}s", (at - self.clock.now_ms()) / 1000.0),
            None => "held".to_string(),
        };
        log::info!(
            "visible {} / incoming {} ({:?}), next advance {}, {} clients, {} peers, {} pending snapshots, {} client errors",
            self.driver.visible_id().unwrap_or("-"),
            self.driver.incoming_id().unwrap_or("-"),
            self.driver.incoming_phase(),
            next,
            self.network.client_count(),
            self.peers.len(),
            self.snapshots.len(),
            self.errors.len(),
        );
        for logged in self.errors.recent() {
            log::info!(
                "  {:.0} {}: {}",
                logged.received_at,
                logged.error.namespace,
                logged.error.message
            );
        }
    }
}
