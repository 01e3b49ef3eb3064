//! Configuration module
//!
//! Handles loading the mock server configuration file.

mod server;

pub use server::*;
