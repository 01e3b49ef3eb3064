//! Action dispatch module
//!
//! Local handlers for named API actions.

mod registry;

pub use registry::*;
