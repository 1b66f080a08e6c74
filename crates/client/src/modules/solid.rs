use serde::Deserialize;
use serde_json::Value;

use wall::Surface;
use wall::module::{ClientContext, ClientModule, ModuleError};
use wall::surface::Color;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SolidConfig {
    color: Color,
}

impl Default for SolidConfig {
    fn default() -> Self {
        Self { color: [0, 0, 0, 255] }
    }
}

/// Fills the screen with one color. Needs nothing from the server.
pub struct SolidClient {
    color: Color,
}

impl SolidClient {
    pub fn create(_ctx: ClientContext, config: &Value) -> Result<Box<dyn ClientModule>, ModuleError> {
        let config = if config.is_null() {
            SolidConfig::default()
        } else {
            SolidConfig::deserialize(config)?
        };
        Ok(Box::new(Self { color: config.color }))
    }
}

impl ClientModule for SolidClient {
    fn draw(&mut self, _time: f64, _delta: f64, surface: &mut dyn Surface) {
        surface.clear(self.color);
    }
}
