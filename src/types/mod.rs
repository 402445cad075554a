//! Type definitions

pub mod location;
pub mod messages;
pub mod plan;

pub use location::*;
pub use messages::*;
pub use plan::*;
