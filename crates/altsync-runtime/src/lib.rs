//! altsync Runtime - Node orchestration
//!
//! This crate drives one peer of the profile sync protocol:
//! 1. Decode and validate inbound messages
//! 2. Merge into the local store (never the self profile)
//! 3. Pull missing data with delta and gossip requests
//! 4. Offer digests of third-party knowledge
//! 5. Correct peers that advertise stale data, once per session
//! 6. Schedule announces (debounce, settle, jitter, heartbeat)
//! 7. Chunk and send within the 255 byte channel cap

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod gossip;
pub mod node;
pub mod outbound;
pub mod protocol;
pub mod telemetry;

pub use config::*;
pub use coordinator::*;
pub use driver::{run, shared, SharedNode};
pub use gossip::*;
pub use node::*;
pub use outbound::*;
pub use protocol::*;
pub use telemetry::*;
