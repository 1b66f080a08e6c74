mod modules;
mod net;
mod player;
mod render;
mod title;

use anyhow::{Context, Result, bail};
use clap::Parser;

use net::{ClientConfig, WallClient};
use wall::{Point, Rect};

#[derive(Parser)]
#[command(name = "wall-client")]
#[command(about = "One screen of the video wall")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:7777", help = "Server address")]
    server: String,

    #[arg(short, long, help = "Part of the wall this screen shows, as x,y,w,h")]
    rect: Rect,

    #[arg(long, default_value = "0,0", value_parser = parse_point, help = "Screen offset as x,y")]
    offset: Point,

    #[arg(long, default_value_t = 60)]
    render_rate: u32,

    #[arg(long, default_value_t = 200, help = "How far behind the server clock to draw, in ms")]
    render_delay_ms: u64,

    #[arg(long, default_value_t = 0.25, help = "Raster pixels per wall unit")]
    scale: f64,

    #[arg(long, help = "Show module credits on this screen")]
    title: bool,
}

fn parse_point(s: &str) -> Result<Point> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("bad point {:?}", s))?;
    match parts.as_slice() {
        [x, y] => Ok(Point::new(*x, *y)),
        _ => bail!("expected x,y but got {:?}", s),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ClientConfig {
        server: args.server,
        rect: args.rect,
        offset: args.offset,
        render_rate: args.render_rate,
        render_delay_ms: args.render_delay_ms as f64,
        raster_scale: args.scale,
        title: args.title,
        ..Default::default()
    };
    let reconnect = config.reconnect_delay;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        log::info!(
            "Showing {} from {} (reconnect every {:?})",
            config.rect,
            config.server,
            reconnect
        );
        let client = WallClient::new(config, modules::registry());
        client
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        Ok(())
    })
}
