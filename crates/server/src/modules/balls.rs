use serde::Deserialize;
use serde_json::{Value, json};

use wall::module::{BoxFuture, ModuleError, ServerContext, ServerModule};

pub const PALETTE: [[u8; 4]; 4] = [
    [230, 57, 70, 255],
    [241, 250, 238, 255],
    [168, 218, 220, 255],
    [69, 123, 157, 255],
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BallsConfig {
    pub count: usize,
    pub radius: f64,
    /// Wall pixels per second.
    pub speed: f64,
    pub seed: u64,
}

impl Default for BallsConfig {
    fn default() -> Self {
        Self {
            count: 8,
            radius: 40.0,
            speed: 300.0,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Ball {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    color: usize,
}

/// Balls bouncing across the whole wall. Positions go out through the state
/// store every tick; colors change on every bounce.
pub struct BallsServer {
    ctx: ServerContext,
    config: BallsConfig,
    balls: Vec<Ball>,
    rng: u64,
}

impl BallsServer {
    pub fn create(ctx: ServerContext, config: &Value) -> Result<Box<dyn ServerModule>, ModuleError> {
        let config = if config.is_null() {
            BallsConfig::default()
        } else {
            BallsConfig::deserialize(config)?
        };
        Ok(Box::new(Self {
            rng: config.seed,
            ctx,
            config,
            balls: Vec::new(),
        }))
    }

    fn next_unit(&mut self) -> f64 {
        self.rng = self.rng.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.rng;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        (z >> 11) as f64 / (1u64 << 53) as f64
    }

    fn spawn_balls(&mut self) {
        let wall = self.ctx.wall;
        let r = self.config.radius;
        self.balls = (0..self.config.count)
            .map(|i| {
                let angle = self.next_unit() * std::f64::consts::TAU;
                Ball {
                    x: wall.x + r + self.next_unit() * (wall.w - 2.0 * r).max(0.0),
                    y: wall.y + r + self.next_unit() * (wall.h - 2.0 * r).max(0.0),
                    vx: angle.cos() * self.config.speed,
                    vy: angle.sin() * self.config.speed,
                    color: i % PALETTE.len(),
                }
            })
            .collect();
    }

    fn step(&mut self, delta_ms: f64) {
        let wall = self.ctx.wall;
        let r = self.config.radius;
        let dt = delta_ms / 1000.0;
        for ball in &mut self.balls {
            ball.x += ball.vx * dt;
            ball.y += ball.vy * dt;

            let mut bounced = false;
            if ball.x - r < wall.x && ball.vx < 0.0 || ball.x + r > wall.x + wall.w && ball.vx > 0.0 {
                ball.vx = -ball.vx;
                bounced = true;
            }
            if ball.y - r < wall.y && ball.vy < 0.0 || ball.y + r > wall.y + wall.h && ball.vy > 0.0 {
                ball.vy = -ball.vy;
                bounced = true;
            }
            if bounced {
                ball.color = (ball.color + 1) % PALETTE.len();
            }
        }
    }

    fn snapshot(&self) -> Value {
        Value::Array(
            self.balls
                .iter()
                .map(|b| json!({ "x": b.x, "y": b.y, "color": b.color }))
                .collect(),
        )
    }
}

impl ServerModule for BallsServer {
    fn prepare(&mut self, _deadline: f64) -> BoxFuture<'_, Result<(), ModuleError>> {
        Box::pin(async move {
            self.spawn_balls();

            let radius = self.config.radius;
            self.ctx.network.on("hello", move |_, socket| {
                socket.send("config", json!({ "radius": radius, "palette": PALETTE }));
            });

            let id = self.ctx.id.clone();
            self.ctx.subscriptions.on_client_joined(move |record| {
                log::debug!("{}: {} joined mid-run", id, record.rect);
            });
            Ok(())
        })
    }

    fn tick(&mut self, time: f64, delta: f64) {
        self.step(delta);
        self.ctx.state.store("balls", time, self.snapshot());
    }

    fn dispose(&mut self) {
        log::debug!("{}: {} balls retired", self.ctx.id, self.balls.len());
        self.balls.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use wall::module::JoinSubscriptions;
    use wall::net::{ChannelOverlays, ClientStart, Outbound, ServerNetwork, SocketHandle, StateFlush};
    use wall::state::StateStore;
    use wall::{ManualClock, Rect};

    fn context(network: &Arc<ServerNetwork>, store: &StateStore) -> ServerContext {
        let overlays = ChannelOverlays::new(Arc::clone(network));
        ServerContext {
            id: "1-1000".into(),
            network: overlays.open("1-1000"),
            state: store.open("1-1000"),
            wall: Rect::new(0.0, 0.0, 1000.0, 500.0),
            clock: Arc::new(ManualClock::new(0.0)),
            subscriptions: JoinSubscriptions::new(Arc::clone(network)),
        }
    }

    #[tokio::test]
    async fn balls_stay_on_the_wall() {
        let network = Arc::new(ServerNetwork::default());
        let (socket, mut rx) = SocketHandle::channel();
        let start = ClientStart {
            rect: Some("0,0,1000,500".into()),
            offset: Default::default(),
        };
        network.register(&start, socket).unwrap();

        let store = StateStore::new(network.clone());
        let config = json!({ "count": 5, "radius": 10.0, "speed": 2000.0 });
        let mut module = BallsServer::create(context(&network, &store), &config).unwrap();

        module.prepare(0.0).await.unwrap();
        assert_eq!(network.events().handler_count("1-1000:hello"), 1);
        assert_eq!(network.listener_count(), 1);

        for i in 0..200 {
            module.tick(i as f64 * 100.0, 100.0);
        }
        assert!(store.flush());

        let flush: StateFlush = match rx.try_recv() {
            Ok(Outbound::Frame(frame)) => frame.decode().unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        let entry = &flush["1-1000"]["balls"];
        assert_eq!(entry.time, 19_900.0);
        let balls = entry.data.as_array().unwrap();
        assert_eq!(balls.len(), 5);
        for ball in balls {
            let x = ball["x"].as_f64().unwrap();
            let y = ball["y"].as_f64().unwrap();
            assert!((-200.0..=1200.0).contains(&x));
            assert!((-200.0..=700.0).contains(&y));
        }
    }

    #[test]
    fn bounce_changes_color() {
        let network = Arc::new(ServerNetwork::default());
        let store = StateStore::new(network.clone());
        let mut module = BallsServer {
            ctx: context(&network, &store),
            config: BallsConfig::default(),
            balls: vec![Ball {
                x: 990.0,
                y: 250.0,
                vx: 100.0,
                vy: 0.0,
                color: 0,
            }],
            rng: 1,
        };

        module.step(100.0);
        assert!(module.balls[0].vx < 0.0);
        assert_eq!(module.balls[0].color, 1);

        let snapshot = module.snapshot();
        assert_eq!(snapshot[0]["color"], json!(1));
    }

    #[test]
    fn bad_config_is_rejected() {
        let network = Arc::new(ServerNetwork::default());
        let store = StateStore::new(network.clone());
        let result = BallsServer::create(context(&network, &store), &json!({ "count": "many" }));
        assert!(matches!(result, Err(ModuleError::Config(_))));
    }
}
