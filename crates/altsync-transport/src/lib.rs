//! altsync Transport Layer - Host messaging boundary
//!
//! This crate provides:
//! - The transport port (`Transport` trait, routes, send outcomes)
//! - Pre-flight size enforcement on every send
//! - In-memory adapter for tests and simulation
//! - UDP adapter with a background receive loop

pub mod memory;
pub mod port;
pub mod udp;

pub use memory::*;
pub use port::*;
pub use udp::*;
