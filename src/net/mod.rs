//! Network helpers
//!
//! Local address discovery and UDP broadcast datagrams.

mod local_ip;
mod udp;

pub use local_ip::*;
pub use udp::*;
