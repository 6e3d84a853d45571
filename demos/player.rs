//! RTMP test client: play, save, publish or load test
//!
//! Run with: cargo run --example player -- <rtmp_url> [options]
//!
//! Options:
//!   --save <file.flv>       write played media to an FLV file
//!   --publish <file.flv>    publish a file instead of playing
//!   --mode live|record|append
//!   --loop <n>              publish the file n times back to back
//!   --start <ms> --length <ms>
//!   --load <n> --threads <n> run n concurrent players
//!   --swf <file.swf>        answer SWF verification
//!
//! The stream name is the last path segment of the URL.

use rtmp_engine::client::{self, ClientOptions};
use rtmp_engine::registry::PublishMode;

fn usage() -> ! {
    eprintln!("Usage: player <rtmp_url> [--save f] [--publish f] [--mode m] [--loop n]");
    eprintln!("       [--start ms] [--length ms] [--load n] [--threads n] [--swf f]");
    eprintln!("Example: player rtmp://localhost/vod/clip --save copy.flv");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_engine=info".parse()?)
                .add_directive("player=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| usage());
    let mut options = ClientOptions::parse_url(&url)?;

    let mut publish_file = None;
    let mut mode = PublishMode::Live;
    let mut swf = None;
    while let Some(flag) = args.next() {
        let value = args.next().unwrap_or_else(|| usage());
        match flag.as_str() {
            "--save" => options = options.save_as(value),
            "--publish" => publish_file = Some(value),
            "--mode" => mode = PublishMode::parse(&value),
            "--loop" => options = options.loop_count(value.parse()?),
            "--start" => options.start = value.parse()?,
            "--length" => options.length = value.parse()?,
            "--load" => options.load = value.parse()?,
            "--threads" => options.threads = value.parse()?,
            "--swf" => swf = Some(value),
            _ => usage(),
        }
    }
    if let Some(path) = publish_file {
        options = options.publish_file(path, mode);
    }
    if let Some(path) = swf {
        options = options.swf_file(path).await?;
    }

    println!("Connecting to {}", options.tc_url());
    if options.load > 1 {
        let report = client::run_load(options).await?;
        println!("Load run: {} completed, {} failed, {} messages", report.completed, report.failed, report.messages);
        return Ok(());
    }

    tokio::select! {
        result = client::run(options) => result?,
        _ = tokio::signal::ctrl_c() => println!("\nInterrupted"),
    }
    Ok(())
}
