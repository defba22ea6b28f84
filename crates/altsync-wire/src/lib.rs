//! altsync Wire Protocol - Envelope format and messages
//!
//! This crate implements the wire format for altsync messages:
//! - 2-byte envelope header (version, flags)
//! - bincode payload, optionally zstd-compressed
//! - Closed set of protocol messages, type carried inside the payload

pub mod envelope;
pub mod flags;
pub mod message;

pub use envelope::*;
pub use flags::*;
pub use message::*;
