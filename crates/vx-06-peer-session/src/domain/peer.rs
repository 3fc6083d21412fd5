//! Peer relationship parameters and the checks run at `SessionOpen`.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use vx_01_tier_identity::{is_adjacency_legal, NodeId, NodeIdentity, Tier};

/// How a peer became known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerOrigin {
    /// Configured; reconnected after failure.
    Bootstrap,
    /// Accepted from the network; forgotten after closing.
    Inbound,
}

/// A configured bootstrap peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPeer {
    pub address: IpAddr,
    pub session_port: u16,
    pub handshake_port: u16,
    /// Identifier the peer must authenticate as. Without it the adjacency
    /// check waits for the peer's Open.
    pub expected_id: Option<NodeId>,
}

impl BootstrapPeer {
    pub fn session_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.session_port)
    }

    pub fn handshake_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.handshake_port)
    }

    /// Evaluate adjacency before any connection attempt.
    pub fn precheck(&self, local: Tier) -> SessionResult<()> {
        let Some(id) = self.expected_id else {
            return Ok(());
        };
        let remote = id.tier().ok_or(SessionError::UnknownTier { id })?;
        check_adjacency(local, remote)
    }
}

pub fn check_adjacency(local: Tier, remote: Tier) -> SessionResult<()> {
    if is_adjacency_legal(local, remote) {
        Ok(())
    } else {
        Err(SessionError::IllegalAdjacency { local, remote })
    }
}

/// Validate the remote's claimed identity against the one its channel
/// authenticated.
pub fn check_open_identity(claimed: &NodeIdentity, authenticated: &NodeIdentity) -> SessionResult<()> {
    claimed.validate()?;
    if claimed != authenticated {
        return Err(SessionError::protocol(format!(
            "Open identity {claimed} differs from channel identity {authenticated}"
        )));
    }
    Ok(())
}

/// Hold time both sides use: the smaller of the two offers.
pub fn negotiate_hold_time(local_secs: u16, remote_secs: u16) -> Duration {
    Duration::from_secs(u64::from(local_secs.min(remote_secs)))
}

/// Keepalive period: the configured interval, but at least three per hold
/// time and never below one second.
pub fn keepalive_interval(configured: Duration, hold: Duration) -> Duration {
    configured.min(hold / 3).max(Duration::from_secs(1))
}
