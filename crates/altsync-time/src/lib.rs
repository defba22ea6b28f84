//! altsync Time - Clocks and timer bookkeeping
//!
//! This crate provides the time side of the single-threaded event loop:
//! - Clock abstraction (system wall clock, manual clock for tests)
//! - Cancellable one-shot timers keyed by action
//! - Time-based sampling gate for bursty external signals
//!
//! Nothing here sleeps. The owner polls with the current time and acts on
//! whatever became due.

pub mod clock;
pub mod timers;

pub use clock::*;
pub use timers::*;
