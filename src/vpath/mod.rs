//! Virtual path mapping and resolution

pub mod mapping;
pub mod resolver;

pub use mapping::*;
pub use resolver::*;
