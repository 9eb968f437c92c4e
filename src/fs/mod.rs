//! Local filesystem side of the sync
//!
//! Upper-layer entry classification, overlay staging layout and kernel
//! overlay support detection.

mod classify;
mod kernel;
mod overlay;

pub use classify::*;
pub use kernel::*;
pub use overlay::*;
