mod server;
mod util;

use std::env;

use anyhow::Result;
use vr_stream_rtc::config::StreamConfig;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("server") => {
            let config = match args.get(2) {
                Some(path) => StreamConfig::load(path)?,
                None => StreamConfig::default(),
            };
            println!("Starting session server...");
            server::main(config)
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("VR Stream RTC");
    println!("Usage:");
    println!("  vr-stream-rtc server [config.toml]  - Start the stereo session server");
}
