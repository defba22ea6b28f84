//! UDP host adapter
//!
//! Stands in for a real group-chat channel. Each datagram carries a small
//! host header in front of the altsync envelope:
//!
//! ```text
//! [channel: u8][sender len: u8][sender key][envelope...]
//! ```
//!
//! Broadcast fans out to every peer in the address book. Sends use
//! `try_send_to` so the event loop never waits on the socket; a full send
//! buffer surfaces as `Throttled`.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use altsync_core::{SyncError, SyncResult};
use altsync_wire::MAX_MESSAGE_SIZE;

use crate::{Channel, Route, SendOutcome, Transport};

/// Largest datagram the adapter produces
pub const MAX_DATAGRAM_SIZE: usize = 2 + u8::MAX as usize + MAX_MESSAGE_SIZE;

const CHANNEL_BROADCAST: u8 = 0;
const CHANNEL_DIRECT: u8 = 1;

/// A datagram after the host header has been stripped
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    pub bytes: Vec<u8>,
    pub channel: Channel,
    pub sender: String,
    pub addr: SocketAddr,
}

/// Prefix `payload` with the host header
pub fn encode_datagram(channel: Channel, sender: &str, payload: &[u8]) -> Option<Vec<u8>> {
    let sender_len = u8::try_from(sender.len()).ok()?;
    let mut buf = Vec::with_capacity(2 + sender.len() + payload.len());
    buf.push(match channel {
        Channel::Broadcast => CHANNEL_BROADCAST,
        Channel::Direct => CHANNEL_DIRECT,
    });
    buf.push(sender_len);
    buf.extend_from_slice(sender.as_bytes());
    buf.extend_from_slice(payload);
    Some(buf)
}

/// Strip the host header; `None` for anything malformed
pub fn decode_datagram(buf: &[u8], addr: SocketAddr) -> Option<Inbound> {
    let (&channel, rest) = buf.split_first()?;
    let channel = match channel {
        CHANNEL_BROADCAST => Channel::Broadcast,
        CHANNEL_DIRECT => Channel::Direct,
        _ => return None,
    };
    let (&len, rest) = rest.split_first()?;
    let len = len as usize;
    if rest.len() < len {
        return None;
    }
    let sender = std::str::from_utf8(&rest[..len]).ok()?.to_string();
    Some(Inbound {
        bytes: rest[len..].to_vec(),
        channel,
        sender,
        addr,
    })
}

/// UDP transport with a peer address book
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    local_key: String,
    peers: RwLock<HashMap<String, SocketAddr>>,
}

impl UdpTransport {
    /// Bind to a local address, sending as `local_key`
    pub async fn bind(addr: SocketAddr, local_key: impl Into<String>) -> SyncResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| SyncError::TransportError(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| SyncError::TransportError(e.to_string()))?;

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
            local_key: local_key.into(),
            peers: RwLock::new(HashMap::new()),
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    /// Add or move a peer
    pub fn add_peer(&self, key: impl Into<String>, addr: SocketAddr) {
        self.peers.write().insert(key.into(), addr);
    }

    pub fn remove_peer(&self, key: &str) -> bool {
        self.peers.write().remove(key).is_some()
    }

    /// Keys of every peer in the address book
    pub fn peer_keys(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    /// Get a clone of the socket for the receive loop
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    fn send_one(&self, datagram: &[u8], addr: SocketAddr) -> SendOutcome {
        match self.socket.try_send_to(datagram, addr) {
            Ok(_) => SendOutcome::Sent,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => SendOutcome::Throttled,
            Err(e) => SendOutcome::Generic(e.to_string()),
        }
    }
}

impl Transport for UdpTransport {
    fn deliver(&self, bytes: &[u8], route: &Route) -> SendOutcome {
        let Some(datagram) = encode_datagram(route.channel, &self.local_key, bytes) else {
            return SendOutcome::NotEligible;
        };

        match route.channel {
            Channel::Direct => {
                let addr = route
                    .target
                    .as_deref()
                    .and_then(|target| self.peers.read().get(target).copied());
                match addr {
                    Some(addr) => self.send_one(&datagram, addr),
                    None => SendOutcome::TargetUnreachable,
                }
            }
            Channel::Broadcast => {
                let addrs: Vec<SocketAddr> = self.peers.read().values().copied().collect();
                // First failure wins; the rest of the group still gets it
                let mut outcome = SendOutcome::Sent;
                for addr in addrs {
                    let result = self.send_one(&datagram, addr);
                    if outcome.is_sent() && !result.is_sent() {
                        outcome = result;
                    }
                }
                outcome
            }
        }
    }
}

/// Inbound datagram receiver channel
pub type InboundReceiver = mpsc::Receiver<Inbound>;

/// Start a background receive loop
///
/// Datagrams without a valid host header are dropped here; the envelope
/// inside is left for the node to decode.
pub fn start_receive_loop(socket: Arc<UdpSocket>, buffer_size: usize) -> InboundReceiver {
    let (tx, rx) = mpsc::channel(buffer_size);

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    let Some(inbound) = decode_datagram(&buf[..len], addr) else {
                        tracing::debug!(%addr, len, "dropped datagram without host header");
                        continue;
                    };
                    if tx.send(inbound).await.is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(e) => {
                    tracing::warn!("UDP receive error: {}", e);
                }
            }
        }
    });

    rx
}
