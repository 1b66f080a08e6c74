mod activation;
mod config;
mod driver;
mod errors;
mod events;
mod modules;
mod peer;
mod server;
mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use config::{DriverConfig, Playlist, ServerConfig};
use server::{ServerCommand, ServerHandle, WallServer};
use wall::{Rect, SystemClock};

#[derive(Parser)]
#[command(name = "wall-server")]
#[command(about = "Video wall coordinator")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = wall::net::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 10)]
    tick_rate: u32,

    #[arg(long, default_value_t = 30, help = "State flush interval in ms")]
    flush_ms: u64,

    #[arg(long, default_value_t = 5000, help = "Crossfade between modules in ms")]
    crossfade_ms: u64,

    #[arg(long, default_value_t = 5000, help = "Time a module may spend preparing in ms")]
    prepare_timeout_ms: u64,

    #[arg(long, default_value = "0,0,1920,1080", help = "Wall extents as x,y,w,h")]
    wall: Rect,

    #[arg(short, long, default_value_t = wall::net::DEFAULT_MAX_CLIENTS)]
    max_clients: usize,

    #[arg(long, help = "Playlist JSON; the built-in demo is used when absent")]
    playlist: Option<PathBuf>,

    #[arg(long, help = "Ignore stdin control commands")]
    no_console: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let playlist = match &args.playlist {
        Some(path) => Playlist::load(path)?,
        None => Playlist::demo(),
    };
    let (library, schedule) = playlist.build().context("invalid playlist")?;

    let config = ServerConfig {
        bind: format!("{}:{}", args.bind, args.port),
        tick_rate: args.tick_rate,
        flush_interval: Duration::from_millis(args.flush_ms),
        max_clients: args.max_clients,
        wall: args.wall,
        driver: DriverConfig {
            crossfade: Duration::from_millis(args.crossfade_ms),
            prepare_timeout: Duration::from_millis(args.prepare_timeout_ms),
            ..Default::default()
        },
        ..Default::default()
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let server = WallServer::bind(
            config,
            library,
            schedule,
            modules::registry(),
            Arc::new(SystemClock),
        )
        .await
        .context("binding listener")?;
        log::info!("Server started on {}", server.local_addr()?);

        if !args.no_console {
            tokio::spawn(console(server.handle()));
        }

        server
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        Ok(())
    })
}

/// Line commands on stdin: `next`, `play <module>`, `black`, `status`,
/// `snapshot <x,y,w,h>`.
async fn console(handle: ServerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut words = line.split_whitespace();
        let command = match (words.next(), words.next()) {
            (Some("next"), _) => ServerCommand::SkipAhead,
            (Some("black"), _) => ServerCommand::FadeToBlack,
            (Some("status"), _) => ServerCommand::Status,
            (Some("play"), Some(name)) => ServerCommand::PlayModule(name.to_string()),
            (Some("snapshot"), Some(rect)) => {
                let rect = match rect.parse::<Rect>() {
                    Ok(rect) => rect,
                    Err(e) => {
                        log::warn!("Bad rect: {}", e);
                        continue;
                    }
                };
                let handle = handle.clone();
                tokio::spawn(async move {
                    match handle.take_snapshot(rect).await {
                        Ok(s) => log::info!("Snapshot of {}: {}x{}", rect, s.width, s.height),
                        Err(e) => log::warn!("Snapshot of {} failed: {}", rect, e),
                    }
                });
                continue;
            }
            (None, _) => continue,
            _ => {
                log::warn!("Unknown command {:?}", line);
                continue;
            }
        };
        if !handle.send(command) {
            break;
        }
    }
}
