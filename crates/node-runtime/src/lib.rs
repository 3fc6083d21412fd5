//! # Node Runtime Library
//!
//! Configuration loading and engine lifecycle for the `vx0-node` binary,
//! exposed as a library for testing.

pub mod config;
pub mod runtime;

pub use config::{ConfigError, ConfigResult, NodeConfig};
pub use runtime::{log_status, NodeRuntime};
