use std::time::Duration;

use wall::net::DEFAULT_PORT;
use wall::{Point, Rect};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    /// Part of the wall this screen shows.
    pub rect: Rect,
    pub offset: Point,
    pub render_rate: u32,
    /// How far behind the clock modules draw, so state has arrived.
    pub render_delay_ms: f64,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub prepare_timeout: Duration,
    /// Pixels per wall unit in the raster surface.
    pub raster_scale: f64,
    /// Whether this screen shows module credits.
    pub title: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", DEFAULT_PORT),
            rect: Rect::new(0.0, 0.0, 1920.0, 1080.0),
            offset: Point::ZERO,
            render_rate: 60,
            render_delay_ms: 200.0,
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            prepare_timeout: Duration::from_secs(5),
            raster_scale: 0.25,
            title: false,
        }
    }
}

impl ClientConfig {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.render_rate.max(1) as f64)
    }
}
