use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};

use teamcast::peer::node::PeerNode;
use teamcast::team::mutator::IdentityMutator;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4552")]
    splitter: SocketAddr,
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

    let (node, mut delivery) = PeerNode::join(args.splitter, Arc::new(IdentityMutator)).await?;
    info!("onboarded; header is {} bytes", node.header().len());

    let mut team_events = node.team_events();
    tokio::spawn(async move {
        while let Ok(event) = team_events.recv().await {
            info!("team event: {:?}", event);
        }
    });

    // stand-in for a local player: count what would be played
    tokio::spawn(async move {
        let mut chunks = 0u64;
        while let Some(payload) = delivery.recv().await {
            chunks += 1;
            if chunks % 100 == 0 {
                info!("played {} chunks ({} bytes each)", chunks, payload.len());
            }
        }
    });

    let shutdown = node.shutdown_handle();
    tokio::select! {
        r = node.run() => r,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, leaving the team");
            shutdown.shutdown();
            Ok(())
        }
    }
}
