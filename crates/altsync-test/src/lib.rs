//! altsync Test Harness - Simulation and protocol validation
//!
//! This crate provides:
//! - Chaos network (latency, loss, bursts, duplication)
//! - Swarm simulator running real nodes on a shared manual clock
//! - Store fuzzing against the merge rules
//! - End-to-end integration scenarios

pub mod chaos;
pub mod simulator;
pub mod store_fuzzer;
pub mod integration;

pub use chaos::*;
pub use simulator::*;
pub use store_fuzzer::*;
pub use integration::*;
