use std::net::SocketAddr;

use clap::Parser;
use tracing::{info, Level};

use teamcast::splitter::config::SplitterConfig;
use teamcast::splitter::ingest::Splitter;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4551")]
    source: SocketAddr,

    /// TCP onboarding port and UDP team channel port
    #[arg(long, default_value_t = 4552)]
    port: u16,

    #[arg(long, default_value = "BBB-134.ogv")]
    channel: String,

    #[arg(long, default_value_t = 1024)]
    chunk_size: usize,

    /// stream header length in chunks
    #[arg(long, default_value_t = 10)]
    header_size: usize,

    #[arg(long, default_value_t = 256)]
    buffer_size: usize,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = SplitterConfig::new(args.source);
    config.port = args.port;
    config.channel = args.channel;
    config.chunk_size = args.chunk_size;
    config.header_size = args.header_size;
    config.buffer_size = args.buffer_size;

    let mut splitter = Splitter::new(config);

    tokio::select! {
        r = splitter.run() => r,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}
