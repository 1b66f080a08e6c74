use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

use wall::module::{ModuleDef, ModuleLibrary, Schedule, ScheduleEntry};
use wall::net::DEFAULT_MAX_CLIENTS;
use wall::Rect;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub crossfade: Duration,
    pub prepare_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            crossfade: Duration::from_millis(5000),
            prepare_timeout: Duration::from_millis(5000),
            retry_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub tick_rate: u32,
    pub flush_interval: Duration,
    pub time_interval: Duration,
    pub snapshot_timeout: Duration,
    pub max_clients: usize,
    pub wall: Rect,
    pub driver: DriverConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", wall::net::DEFAULT_PORT),
            tick_rate: 10,
            flush_interval: Duration::from_millis(30),
            time_interval: Duration::from_secs(10),
            snapshot_timeout: Duration::from_secs(5),
            max_clients: DEFAULT_MAX_CLIENTS,
            wall: Rect::new(0.0, 0.0, 1920.0, 1080.0),
            driver: DriverConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

/// Module library plus the order to play them in, as stored on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Playlist {
    pub modules: Vec<ModuleDef>,
    pub schedule: Vec<ScheduleEntry>,
}

impl Playlist {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading playlist {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing playlist {}", path.display()))
    }

    pub fn demo() -> Self {
        Self {
            modules: vec![
                ModuleDef::new("balls")
                    .with_server("balls")
                    .with_client("balls")
                    .with_config(Some(json!({ "count": 12 }))),
                ModuleDef::new("solid")
                    .with_client("solid")
                    .with_config(Some(json!({ "color": [32, 64, 160, 255] }))),
            ],
            schedule: vec![ScheduleEntry::new("balls", 60.0), ScheduleEntry::new("solid", 15.0)],
        }
    }

    pub fn build(self) -> Result<(ModuleLibrary, Schedule)> {
        let library = ModuleLibrary::from_defs(self.modules)?;
        let schedule = Schedule::new(self.schedule);
        schedule.validate(&library)?;
        Ok((library, schedule))
    }
}
