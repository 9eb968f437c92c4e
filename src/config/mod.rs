//! Configuration module for overlaysync
//!
//! Provides CLI arguments, runtime sync settings and backend selection.

mod settings;

pub use settings::*;
