use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};

use wall::module::ClientModules;
use wall::net::{
    ClientNetwork, ClientStart, Frame, Inbound, LoadModule, SocketHandle, StateFlush, TakeSnapshot,
    TimeSync, connect, kind,
};
use wall::{AdjustableClock, Clock, SharedClock, StateManager};

use super::config::ClientConfig;
use crate::player::{ClientPlayer, SurfaceFactory};
use crate::render::RasterSurface;

/// One screen of the wall: keeps a connection to the server alive, follows
/// its clock, and draws whatever module the server says is playing.
pub struct WallClient {
    config: ClientConfig,
    clock: Arc<AdjustableClock>,
    network: Arc<ClientNetwork>,
    state: StateManager,
    player: ClientPlayer,
    last_frame_ms: f64,
}

impl WallClient {
    pub fn new(config: ClientConfig, modules: ClientModules) -> Self {
        let scale = config.raster_scale;
        let surfaces: SurfaceFactory = Arc::new(move |rect| Box::new(RasterSurface::new(rect, scale)));
        Self::with_surfaces(config, modules, surfaces)
    }

    pub fn with_surfaces(config: ClientConfig, modules: ClientModules, surfaces: SurfaceFactory) -> Self {
        let clock = Arc::new(AdjustableClock::default());
        let shared: SharedClock = clock.clone();
        let network = Arc::new(ClientNetwork::new());
        let state = StateManager::new(Arc::clone(&shared));
        let player = ClientPlayer::new(
            config.rect,
            modules,
            surfaces,
            Arc::clone(&network),
            state.clone(),
            Arc::clone(&shared),
            config.prepare_timeout,
        )
        .with_title_display(config.title);

        Self {
            last_frame_ms: clock.now_ms(),
            config,
            clock,
            network,
            state,
            player,
        }
    }

    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut frames = interval(self.config.frame_duration());
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let reconnect = sleep(std::time::Duration::ZERO);
        tokio::pin!(reconnect);
        let mut server: Option<SocketHandle> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = &mut reconnect, if server.is_none() => {
                    let attempt = timeout(
                        self.config.connect_timeout,
                        connect(self.config.server.as_str(), inbound_tx.clone()),
                    );
                    match attempt.await {
                        Ok(Ok(socket)) => {
                            self.attach(socket.clone());
                            server = Some(socket);
                        }
                        Ok(Err(e)) => {
                            log::warn!("Failed to connect to {}: {}", self.config.server, e);
                            reconnect.as_mut().reset(Instant::now() + self.config.reconnect_delay);
                        }
                        Err(_) => {
                            log::warn!("Timed out connecting to {}", self.config.server);
                            reconnect.as_mut().reset(Instant::now() + self.config.reconnect_delay);
                        }
                    }
                }
                Some(inbound) = inbound_rx.recv() => match inbound {
                    Inbound::Frame { socket, frame } => self.handle_frame(&socket, frame),
                    Inbound::Disconnected { id, reason } => {
                        if server.as_ref().is_some_and(|s| s.id() == id) {
                            log::warn!(
                                "Lost server connection ({}), keeping {} on screen",
                                reason.as_str(),
                                self.player.visible_id().unwrap_or("nothing")
                            );
                            self.network.detach();
                            server = None;
                            reconnect.as_mut().reset(Instant::now() + self.config.reconnect_delay);
                        }
                    }
                },
                Some(joined) = self.player.next_prepared(), if self.player.is_preparing() => {
                    self.player.on_prepared(joined);
                }
                _ = frames.tick() => self.render(),
            }
        }

        log::info!("Shutting down");
        self.player.shutdown();
        if let Some(socket) = self.network.detach() {
            socket.close();
        }
    }

    fn attach(&mut self, socket: SocketHandle) {
        log::info!("Connected to {} as {}", self.config.server, self.config.rect);
        self.network.attach(socket.clone());
        let start = ClientStart {
            rect: Some(self.config.rect.serialize()),
            offset: self.config.offset,
        };
        match Frame::encode(kind::CLIENT_START, &start) {
            Ok(frame) => {
                socket.send_frame(frame);
            }
            Err(e) => log::error!("Failed to encode client start: {}", e),
        }
    }

    fn handle_frame(&mut self, socket: &SocketHandle, frame: Frame) {
        match frame.kind.as_str() {
            kind::TIME => match frame.decode::<TimeSync>() {
                Ok(sync) => self.clock.adjust(sync.time),
                Err(e) => log::warn!("{}", e),
            },
            kind::LOAD_MODULE => match frame.decode::<LoadModule>() {
                Ok(load) => self.player.load(load),
                Err(e) => log::warn!("{}", e),
            },
            kind::STATE => match frame.decode::<StateFlush>() {
                Ok(flush) => self.state.receive_flush(flush),
                Err(e) => log::warn!("{}", e),
            },
            kind::STATE_CLOSED => match frame.payload.as_str() {
                Some(module_id) => self.state.receive_closed(module_id),
                None => log::warn!("Malformed {} payload", kind::STATE_CLOSED),
            },
            kind::TAKE_SNAPSHOT => match frame.decode::<TakeSnapshot>() {
                Ok(request) => {
                    let response = self.player.take_snapshot(request.id);
                    match Frame::encode(kind::TAKE_SNAPSHOT_RES, &response) {
                        Ok(frame) => {
                            socket.send_frame(frame);
                        }
                        Err(e) => log::error!("Failed to encode snapshot: {}", e),
                    }
                }
                Err(e) => log::warn!("{}", e),
            },
            other => {
                if self.network.dispatch(other, &frame.payload, socket) == 0 {
                    log::debug!("No handler for {}", other);
                }
            }
        }
    }

    fn render(&mut self) {
        let now = self.clock.now_ms();
        let delta = now - self.last_frame_ms;
        self.last_frame_ms = now;
        self.player.render(now, now - self.config.render_delay_ms, delta);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;
    use crate::modules;
    use wall::Rect;
    use wall::net::TakeSnapshotRes;

    fn line(kind: &str, payload: Value) -> Vec<u8> {
        let mut bytes = Frame::new(kind, payload).serialize().unwrap();
        bytes.push(b'\n');
        bytes
    }

    #[tokio::test]
    async fn follows_server_and_answers_snapshots() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            server: listener.local_addr().unwrap().to_string(),
            rect: Rect::new(0.0, 0.0, 40.0, 20.0),
            raster_scale: 1.0,
            ..Default::default()
        };
        let client = WallClient::new(config, modules::registry());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(client.run(async move {
            let _ = stop_rx.await;
        }));

        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let start: Frame = Frame::deserialize(lines.next_line().await.unwrap().unwrap().as_bytes()).unwrap();
        assert_eq!(start.kind, kind::CLIENT_START);
        assert_eq!(start.payload["rect"], "0,0,40,20");

        writer.write_all(&line(kind::TIME, json!({ "time": 50_000.0 }))).await.unwrap();
        let load = json!({
            "module": { "name": "solid", "client": "solid", "config": { "color": [1, 2, 3, 255] } },
            "id": "1-40000",
            "deadline": 40_000.0,
            "geo": [],
        });
        writer.write_all(&line(kind::LOAD_MODULE, load)).await.unwrap();

        // Give the client a few frames to prepare and promote.
        tokio::time::sleep(Duration::from_millis(200)).await;
        writer
            .write_all(&line(kind::TAKE_SNAPSHOT, json!({ "client": "0,0,40,20", "id": 3 })))
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let frame = Frame::deserialize(reply.as_bytes()).unwrap();
        assert_eq!(frame.kind, kind::TAKE_SNAPSHOT_RES);
        let response: TakeSnapshotRes = frame.decode().unwrap();
        assert_eq!(response.id, 3);
        assert_eq!(response.width, Some(40));
        let data = response.data.unwrap();
        assert_eq!(&data[..4], &[1, 2, 3, 255]);

        stop_tx.send(()).unwrap();
        running.await.unwrap();
    }
}
