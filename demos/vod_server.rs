//! VOD and live relay server over a directory of FLV files
//!
//! Run with: cargo run --example vod_server -- [media_dir] [port]
//!
//! Every subdirectory of `media_dir` is an application. `<app>/<name>.flv`
//! plays as `rtmp://localhost/<app>/<name>`; recorded publishes land next
//! to it.
//!
//! ## Publishing
//!
//!   ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/test
//!
//! ## Playing
//!
//!   ffplay rtmp://localhost/vod/clip
//!   cargo run --example player -- rtmp://localhost/vod/clip --save copy.flv

use std::net::SocketAddr;
use std::sync::Arc;

use rtmp_engine::storage::FlvDirectory;
use rtmp_engine::{RtmpServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_engine=info".parse()?)
                .add_directive("vod_server=debug".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let root = args.next().unwrap_or_else(|| "./media".to_string());
    let port: u16 = match args.next() {
        Some(port) => port.parse()?,
        None => 1935,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let config = ServerConfig::with_addr(addr);
    let server = RtmpServer::new(config, Arc::new(FlvDirectory::new(&root)))?;

    println!("Serving {} on {}", root, addr);
    println!("Play:    ffplay rtmp://localhost:{}/<app>/<name>", port);
    println!("Publish: ffmpeg -re -i in.mp4 -c copy -f flv rtmp://localhost:{}/<app>/<name>", port);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    Ok(())
}
