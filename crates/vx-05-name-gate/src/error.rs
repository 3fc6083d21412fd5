//! Error types for gate configuration.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Reserved names must themselves live in the closed namespace
    #[error("reserved name {name:?} is outside the .vx0 namespace")]
    OutsideNamespace { name: String },
}
