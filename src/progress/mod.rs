//! Progress reporting module
//!
//! Provides terminal progress display for sync sessions.

mod reporter;

pub use reporter::*;
