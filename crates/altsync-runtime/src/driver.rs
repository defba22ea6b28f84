//! tokio driver
//!
//! The node itself is synchronous. On a multi-threaded runtime it sits
//! behind one mutex and every inbound datagram and timer tick takes that
//! lock, which keeps handlers serialized exactly as on a single thread.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use altsync_core::SyncResult;
use altsync_transport::InboundReceiver;

use crate::Node;

/// Shared handle to a node
pub type SharedNode = Arc<Mutex<Node>>;

pub fn shared(node: Node) -> SharedNode {
    Arc::new(Mutex::new(node))
}

/// Run until `shutdown` flips to true or the inbound channel closes
///
/// Timers are polled every `tick`. The snapshot is saved on exit.
pub async fn run(
    node: SharedNode,
    mut inbound: InboundReceiver,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> SyncResult<()> {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    node.lock().start();
    tracing::info!(peer = %node.lock().owner_key(), "driver started");

    loop {
        tokio::select! {
            received = inbound.recv() => {
                let Some(datagram) = received else {
                    tracing::info!("inbound channel closed");
                    break;
                };
                node.lock()
                    .on_message(&datagram.bytes, datagram.channel, &datagram.sender);
            }
            _ = interval.tick() => {
                let mut node = node.lock();
                node.poll();
                for notice in node.drain_notices() {
                    tracing::warn!("{}", notice);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let node = node.lock();
    node.save()?;
    tracing::info!(stats = ?node.stats(), "driver stopped");
    Ok(())
}
