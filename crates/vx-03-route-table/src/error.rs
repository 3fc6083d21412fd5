//! Error types for route ingestion.
//!
//! Every variant describes a malformed announcement. The session layer
//! treats any of them as a protocol error and tears the session down.

use ipnet::IpNet;
use thiserror::Error;
use vx_01_tier_identity::NodeId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Prefix has host bits set
    #[error("prefix {prefix} is not in canonical form")]
    NonCanonicalPrefix { prefix: IpNet },

    /// Announcement carries no path
    #[error("announcement for {prefix} has an empty path")]
    EmptyPath { prefix: IpNet },

    /// First hop of the path is not the announcing peer
    #[error("announcement for {prefix} from {peer} starts its path with {first}")]
    PathHeadMismatch {
        prefix: IpNet,
        peer: NodeId,
        first: NodeId,
    },

    /// Next hop is not the announcing peer
    #[error("announcement for {prefix} from {peer} names next hop {next_hop}")]
    NextHopMismatch {
        prefix: IpNet,
        peer: NodeId,
        next_hop: NodeId,
    },

    /// Path repeats a node
    #[error("announcement for {prefix} repeats node {node} in its path")]
    DuplicateHop { prefix: IpNet, node: NodeId },
}

/// Result type for route table operations
pub type RouteResult<T> = Result<T, RouteError>;
