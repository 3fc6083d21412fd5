//! Session table: one entry per session task, plus the identifier index
//! used for collision detection.

use crate::domain::{PeerOrigin, SessionState};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use uuid::Uuid;
use vx_01_tier_identity::{NodeId, NodeIdentity, Tier};
use vx_02_secure_channel::TrafficStats;

/// Externally visible view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: u64,
    pub origin: PeerOrigin,
    pub remote: SocketAddr,
    pub peer: Option<NodeId>,
    pub tier: Option<Tier>,
    pub state: SessionState,
    pub last_error: Option<String>,
    pub channel_id: Option<Uuid>,
    pub traffic: Option<TrafficStats>,
}

/// Outcome of claiming a remote identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    /// Another session already holds this identifier for the same node.
    Duplicate { holder: u64 },
    /// The identifier is ours, or held by a node with a different identity.
    Collision,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<u64, SessionInfo>,
    owners: HashMap<NodeId, (u64, NodeIdentity)>,
}

#[derive(Debug)]
pub struct SessionTable {
    local_id: NodeId,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    /// Woken whenever a claimed identifier is given up.
    released: Notify,
}

impl SessionTable {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            released: Notify::new(),
        }
    }

    /// Add an entry in `Idle` and return its id.
    pub fn register(&self, origin: PeerOrigin, remote: SocketAddr, peer: Option<NodeId>) -> u64 {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = SessionInfo {
            session_id,
            origin,
            remote,
            peer,
            tier: peer.and_then(NodeId::tier),
            state: SessionState::Idle,
            last_error: None,
            channel_id: None,
            traffic: None,
        };
        self.inner.lock().entries.insert(session_id, info);
        session_id
    }

    pub fn set_state(&self, session_id: u64, state: SessionState) {
        if let Some(info) = self.inner.lock().entries.get_mut(&session_id) {
            info.state = state;
        }
    }

    pub fn set_peer(&self, session_id: u64, peer: NodeId, tier: Tier, channel_id: Uuid) {
        if let Some(info) = self.inner.lock().entries.get_mut(&session_id) {
            info.peer = Some(peer);
            info.tier = Some(tier);
            info.channel_id = Some(channel_id);
        }
    }

    pub fn set_error(&self, session_id: u64, error: impl ToString) {
        if let Some(info) = self.inner.lock().entries.get_mut(&session_id) {
            info.last_error = Some(error.to_string());
        }
    }

    pub fn set_traffic(&self, session_id: u64, traffic: TrafficStats) {
        if let Some(info) = self.inner.lock().entries.get_mut(&session_id) {
            info.traffic = Some(traffic);
        }
    }

    /// Reserve the identifier of `peer` for this session.
    pub fn claim(&self, session_id: u64, peer: &NodeIdentity) -> Claim {
        if peer.id() == self.local_id {
            return Claim::Collision;
        }
        let mut inner = self.inner.lock();
        let existing = inner
            .owners
            .get(&peer.id())
            .map(|(holder, held_by)| (*holder, held_by == peer));
        match existing {
            Some((holder, _)) if holder == session_id => Claim::Claimed,
            Some((holder, true)) => Claim::Duplicate { holder },
            Some((_, false)) => Claim::Collision,
            None => {
                inner.owners.insert(peer.id(), (session_id, peer.clone()));
                Claim::Claimed
            }
        }
    }

    /// Give up whatever identifier this session claimed.
    pub fn release(&self, session_id: u64) {
        self.inner
            .lock()
            .owners
            .retain(|_, (holder, _)| *holder != session_id);
        self.released.notify_waiters();
    }

    pub fn remove(&self, session_id: u64) -> Option<SessionInfo> {
        let removed = {
            let mut inner = self.inner.lock();
            inner.owners.retain(|_, (holder, _)| *holder != session_id);
            inner.entries.remove(&session_id)
        };
        self.released.notify_waiters();
        removed
    }

    /// Session currently holding `peer`'s identifier.
    pub fn holder(&self, peer: NodeId) -> Option<u64> {
        self.inner.lock().owners.get(&peer).map(|(holder, _)| *holder)
    }

    /// Resolves once no session holds `peer`'s identifier.
    pub async fn wait_released(&self, peer: NodeId) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.holder(peer).is_none() {
                return;
            }
            notified.await;
        }
    }

    pub fn get(&self, session_id: u64) -> Option<SessionInfo> {
        self.inner.lock().entries.get(&session_id).cloned()
    }

    /// All entries, ordered by id.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut list: Vec<SessionInfo> = self.inner.lock().entries.values().cloned().collect();
        list.sort_by_key(|info| info.session_id);
        list
    }

    pub fn established_count(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|info| info.state == SessionState::Established)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
