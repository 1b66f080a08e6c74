mod client;
mod config;

pub use client::WallClient;
pub use config::ClientConfig;
