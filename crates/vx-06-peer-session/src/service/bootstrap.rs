//! Bootstrap scheduler: keeps one outbound session per configured peer.

use super::session::{run_outbound, wait_for_shutdown, SessionContext, SessionCounters};
use crate::domain::{BootstrapPeer, PeerOrigin, SessionState};
use crate::error::SessionError;
use shared_types::{Backoff, BackoffPolicy};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run until the peer is rejected or the engine shuts down.
///
/// A peer whose adjacency is already known to be illegal is marked
/// `Rejected` without any connection attempt. Every other failure is
/// retried with capped exponential backoff; the backoff resets after a
/// session reaches `Established`. While another session (usually one the
/// peer opened towards us) holds the peer's identifier, the task waits for
/// that session to end instead of retrying.
pub async fn run_bootstrap(ctx: Arc<SessionContext>, peer: BootstrapPeer, policy: BackoffPolicy) {
    let remote = peer.session_addr();
    let session_id = ctx
        .sessions
        .register(PeerOrigin::Bootstrap, remote, peer.expected_id);

    if let Err(e) = peer.precheck(ctx.local.tier()) {
        SessionCounters::bump(&ctx.counters.rejected_adjacencies);
        ctx.sessions.set_state(session_id, SessionState::Rejected);
        ctx.sessions.set_error(session_id, &e);
        warn!("[vx-06] Bootstrap peer {} rejected before connecting: {}", remote, e);
        return;
    }

    let mut backoff = Backoff::new(policy);
    loop {
        if *ctx.shutdown.borrow() {
            break;
        }
        let outcome = run_outbound(&ctx, session_id, &peer).await;
        if outcome.state == SessionState::Rejected {
            info!("[vx-06] Bootstrap peer {} permanently rejected", remote);
            break;
        }
        if matches!(outcome.error, Some(SessionError::Shutdown)) {
            break;
        }
        if outcome.reached_established {
            backoff.reset();
        }
        let peer_id = ctx
            .sessions
            .get(session_id)
            .and_then(|info| info.peer)
            .or(peer.expected_id);
        if let Some(id) = peer_id.filter(|id| ctx.sessions.holder(*id).is_some()) {
            info!(
                "[vx-06] {} already connected through another session, bootstrap to {} parked",
                id, remote
            );
            tokio::select! {
                _ = ctx.sessions.wait_released(id) => {}
                _ = wait_for_shutdown(ctx.shutdown.clone()) => break,
            }
            debug!("[vx-06] Session with {} ended, resuming bootstrap to {}", id, remote);
            backoff.reset();
            continue;
        }
        let delay = backoff.next_delay();
        debug!(
            "[vx-06] Reconnecting to {} in {:?} (attempt {})",
            remote,
            delay,
            backoff.attempts()
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_for_shutdown(ctx.shutdown.clone()) => break,
        }
    }
}
