//! Demonstration of the chunk poisoning attacks: the same peer node as the honest demo, with a
//! poisoning mutator plugged into the relay engine.

use std::net::SocketAddr;

use clap::Parser;
use tracing::{info, Level};

use teamcast::peer::node::PeerNode;
use teamcast::team::mutator::AttackConfig;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4552")]
    splitter: SocketAddr,

    /// poison every chunk for every destination
    #[arg(long)]
    persistent: bool,

    /// poison a random percentage of forwarded chunks (0-100)
    #[arg(long)]
    on_off_ratio: Option<u8>,

    /// poison only chunks forwarded to these addresses
    #[arg(long)]
    selective: Vec<SocketAddr>,
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

    let attack = AttackConfig {
        persistent: args.persistent,
        on_off_ratio: args.on_off_ratio,
        selective_targets: args.selective,
    };
    let mutator = attack.into_mutator();
    info!("relaying with mutator {:?}", mutator);

    let (node, mut delivery) = PeerNode::join(args.splitter, mutator).await?;

    // the attacker still consumes the stream like everyone else
    tokio::spawn(async move {
        while delivery.recv().await.is_some() {}
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
