//! altsync Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout altsync:
//! - Identifiers (PeerKey) and their format rules
//! - Time primitives (Timestamp)
//! - Profile records, summaries and knowledge hints
//! - Error taxonomy shared by every layer

pub mod id;
pub mod time;
pub mod profile;
pub mod error;

pub use id::*;
pub use time::*;
pub use profile::*;
pub use error::*;
