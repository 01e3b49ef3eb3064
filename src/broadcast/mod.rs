//! UDP broadcast module
//!
//! The controllable periodic broadcaster, its message templates and the
//! server address announcer.

mod announcer;
mod controller;
mod template;

pub use announcer::*;
pub use controller::*;
