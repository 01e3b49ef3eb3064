//! Session tracking module
//!
//! Live connection handles, the registry of connected sessions and the
//! table that routes asynchronous responses back to their requester.

mod correlation;
mod handle;
mod registry;

pub use correlation::*;
pub use handle::*;
pub use registry::*;
