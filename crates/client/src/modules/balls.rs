use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use wall::module::{BoxFuture, ClientContext, ClientModule, ModuleError};
use wall::state::{Schema, SharedState};
use wall::surface::Color;
use wall::{Point, Surface};

const BACKGROUND: Color = [8, 8, 12, 255];

#[derive(Debug, Clone, Deserialize)]
struct Appearance {
    radius: f64,
    palette: Vec<Color>,
}

#[derive(Debug, Deserialize)]
struct Ball {
    x: f64,
    y: f64,
    #[serde(default)]
    color: usize,
}

/// Draws the balls the server simulates. Radius and palette arrive once over
/// the module channel; positions come from the interpolated state stream.
pub struct BallsClient {
    ctx: ClientContext,
    balls: SharedState,
    appearance: Arc<Mutex<Option<Appearance>>>,
}

impl BallsClient {
    pub fn schema() -> Schema {
        Schema::array(Schema::object([
            ("x", Schema::lerp()),
            ("y", Schema::lerp()),
            ("color", Schema::nearest()),
        ]))
    }

    pub fn create(ctx: ClientContext, _config: &Value) -> Result<Box<dyn ClientModule>, ModuleError> {
        let balls = ctx.state.define("balls", Self::schema())?;
        let appearance = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&appearance);
        let id = ctx.id.clone();
        ctx.network.on("config", move |payload, _| {
            match Appearance::deserialize(payload) {
                Ok(appearance) => *slot.lock() = Some(appearance),
                Err(e) => log::warn!("{}: bad config: {}", id, e),
            }
        });

        Ok(Box::new(Self {
            ctx,
            balls,
            appearance,
        }))
    }
}

impl ClientModule for BallsClient {
    fn will_be_shown_soon<'a>(
        &'a mut self,
        surface: &'a mut dyn Surface,
        _deadline: f64,
    ) -> BoxFuture<'a, Result<(), ModuleError>> {
        Box::pin(async move {
            surface.clear(BACKGROUND);
            self.ctx.network.send("hello", json!({}));
            Ok(())
        })
    }

    fn draw(&mut self, time: f64, _delta: f64, surface: &mut dyn Surface) {
        surface.clear(BACKGROUND);
        let Some(appearance) = self.appearance.lock().clone() else {
            return;
        };
        let Some(state) = self.balls.get(time) else {
            return;
        };
        let balls: Vec<Ball> = match Vec::deserialize(&state) {
            Ok(balls) => balls,
            Err(e) => {
                log::debug!("{}: unreadable state: {}", self.ctx.id, e);
                return;
            }
        };
        let palette = &appearance.palette;
        for ball in balls {
            let color = palette
                .get(ball.color % palette.len().max(1))
                .copied()
                .unwrap_or([255; 4]);
            let center = surface.to_drawing_space(Point::new(ball.x, ball.y));
            surface.fill_circle(center, appearance.radius, color);
        }
    }

    fn dispose(&mut self) {
        self.balls.clear();
    }
}
