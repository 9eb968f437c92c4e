//! Core sync engine module
//!
//! Provides the bounded-concurrency task scheduler, the overlay sync
//! session and its status log.

mod scheduler;
mod status;
mod syncer;

pub use scheduler::*;
pub use status::*;
pub use syncer::*;
