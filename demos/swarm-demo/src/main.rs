//! altsync Swarm Demo
//!
//! Starts a handful of nodes on localhost UDP inside one process, gives
//! each a few characters and prints what every node knows once they have
//! had time to talk.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use altsync_core::PeerKey;
use altsync_runtime::{driver, init_tracing, Node, NodeConfig, TelemetryConfig};
use altsync_time::SystemClock;
use altsync_transport::{start_receive_loop, UdpTransport};

const PLAYERS: [(&str, &str, &str); 3] = [
    ("Alice#1001", "Thrall", "Durotar"),
    ("Bob#1002", "Jaina", "Theramore"),
    ("Carol#1003", "Anduin", "Stormwind"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&TelemetryConfig {
        default_directive: "info,altsync_runtime=debug".into(),
        ..Default::default()
    });

    println!("=== altsync Swarm Demo ===\n");

    // 1. Bind one socket per player
    let mut transports = Vec::new();
    for (key, _, _) in PLAYERS {
        let addr: SocketAddr = "127.0.0.1:0".parse()?;
        let transport = UdpTransport::bind(addr, key).await?;
        println!("{} listening on {}", key, transport.local_addr());
        transports.push(transport);
    }

    // 2. Everyone knows everyone's address
    let directory: Vec<(String, SocketAddr)> = transports
        .iter()
        .map(|t| (t.local_key().to_string(), t.local_addr()))
        .collect();
    for transport in &transports {
        for (key, addr) in directory.iter().filter(|(k, _)| k != transport.local_key()) {
            transport.add_peer(key.clone(), *addr);
        }
    }

    // 3. Start a node and driver per player
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut nodes = Vec::new();
    let mut tasks = Vec::new();
    for (transport, (key, character, realm)) in transports.into_iter().zip(PLAYERS) {
        let inbound = start_receive_loop(transport.socket(), 256);
        let mut node = Node::new(
            PeerKey::parse(key)?,
            NodeConfig::fast(),
            Box::new(transport),
            Arc::new(SystemClock),
        );
        node.register_owned_identity(character, realm)?;

        let node = driver::shared(node);
        tasks.push(tokio::spawn(driver::run(
            node.clone(),
            inbound,
            Duration::from_millis(200),
            stop_rx.clone(),
        )));
        nodes.push(node);
    }

    tracing::info!(peers = nodes.len(), "swarm started");

    // 4. Let them talk
    println!("\nSyncing for 5 seconds...\n");
    tokio::time::sleep(Duration::from_secs(5)).await;

    for node in &nodes {
        let mut node = node.lock();
        println!("{} knows:", node.owner_key());
        for profile in node.remote_profiles() {
            let names: Vec<_> = profile.characters().keys().cloned().collect();
            println!("   {} ({}) -> {:?}", profile.owner_key(), profile.alias(), names);
        }
        for (_, character, _) in PLAYERS {
            if let Some(owner) = node.owner_of_character(character) {
                println!("   {} is played by {}", character, owner);
            }
        }
        println!("   stats: {:?}\n", node.stats());
    }

    stop_tx.send(true)?;
    for task in tasks {
        task.await??;
    }
    println!("=== Done ===");
    Ok(())
}
