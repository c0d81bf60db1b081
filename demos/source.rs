//! Loopback stand-in for a media source: accepts a GET request and streams a deterministic
//! byte pattern, for trying out the splitter/peer demos without a real streaming server.

use std::net::SocketAddr;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};
use tracing::{info, warn, Level};

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4551")]
    listen: SocketAddr,

    /// bytes written per burst
    #[arg(long, default_value_t = 4096)]
    burst_size: usize,

    /// pause between bursts, in milliseconds
    #[arg(long, default_value_t = 50)]
    burst_interval_ms: u64,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .try_init()
        .ok();
}

async fn serve_stream(mut stream: TcpStream, burst_size: usize, burst_interval: Duration) -> anyhow::Result<()> {
    let mut request = [0u8; 1024];
    let n = stream.read(&mut request).await?;
    info!("request: {:?}", String::from_utf8_lossy(&request[..n]));

    let mut counter = 0u8;
    let mut burst = vec![0u8; burst_size];
    loop {
        for b in burst.iter_mut() {
            *b = counter;
            counter = counter.wrapping_add(1);
        }
        stream.write_all(&burst).await?;
        sleep(burst_interval).await;
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let listener = TcpListener::bind(args.listen).await?;
    info!("fake source listening on {}", args.listen);

    loop {
        let (stream, client) = listener.accept().await?;
        info!(?client, "splitter connected");

        let burst_interval = Duration::from_millis(args.burst_interval_ms);
        let burst_size = args.burst_size;
        tokio::spawn(async move {
            if let Err(e) = serve_stream(stream, burst_size, burst_interval).await {
                warn!(?client, "stream ended: {}", e);
            }
        });
    }
}
