//! altsync State - Local store and replica merging
//!
//! This crate implements the replica side of profile sync:
//! - The local store: one authoritative self profile plus remote replicas
//! - Monotonic last-writer-wins merges for alias and characters
//! - Per-peer gossip knowledge hints
//! - Character name to owner reverse index
//! - Versioned snapshots with forward migration

pub mod index;
pub mod snapshot;
pub mod store;

pub use index::*;
pub use snapshot::*;
pub use store::*;
