//! One session task: transport, channel, Open exchange, then the
//! established loop.
//!
//! The task owns its socket and channel outright. Everything it learns goes
//! through the [`RoutingHub`]; everything it must send arrives on the outbox
//! the hub was given at attach time.

use super::hub::RoutingHub;
use super::sessions::{Claim, SessionTable};
use crate::adapters::{read_preamble, spawn_reader, write_frame_within, write_preamble};
use crate::domain::{
    check_adjacency, check_open_identity, keepalive_interval, negotiate_hold_time, BootstrapPeer,
    Capabilities, NotificationCode, Open, PeerOrigin, SessionEvent, SessionMessage, SessionState,
};
use crate::error::{ErrorKind, SessionError, SessionResult};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vx_01_tier_identity::{NodeId, NodeIdentity};
use vx_02_secure_channel::{ChannelManager, SealedFrame, SecureChannel};

/// Smallest hold time a peer may offer.
pub const MIN_HOLD_TIME_SECS: u16 = 3;

/// Session timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Hold time offered in our Open.
    pub hold_time_secs: u16,
    pub keepalive: Duration,
    /// Zero disables periodic rekeying.
    pub rekey_interval: Duration,
    pub connect_timeout: Duration,
    /// Wait for the connection preamble and for the peer's Open.
    pub open_timeout: Duration,
    /// Wait for the handshake named by an inbound preamble to complete.
    pub claim_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hold_time_secs: 90,
            keepalive: Duration::from_secs(30),
            rekey_interval: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(10),
            open_timeout: Duration::from_secs(30),
            claim_timeout: Duration::from_secs(10),
        }
    }
}

/// Engine-wide failure counters.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub established: AtomicU64,
    pub handshake_failures: AtomicU64,
    pub rejected_adjacencies: AtomicU64,
    pub identity_collisions: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub capacity_refusals: AtomicU64,
}

impl SessionCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, error: &SessionError) {
        match error {
            SessionError::Channel(_) => Self::bump(&self.handshake_failures),
            SessionError::IllegalAdjacency { .. }
            | SessionError::UnknownTier { .. }
            | SessionError::RemoteNotification {
                code: NotificationCode::IllegalAdjacency,
                ..
            } => Self::bump(&self.rejected_adjacencies),
            SessionError::IdentityCollision { .. } => Self::bump(&self.identity_collisions),
            SessionError::CapacityExceeded { .. } => Self::bump(&self.capacity_refusals),
            e if e.kind() == ErrorKind::Protocol => Self::bump(&self.protocol_errors),
            _ => {}
        }
    }
}

/// Shared by every session task of one engine.
pub struct SessionContext {
    pub local: NodeIdentity,
    pub config: SessionConfig,
    pub channels: Arc<ChannelManager>,
    pub hub: Arc<RoutingHub>,
    pub sessions: Arc<SessionTable>,
    pub counters: Arc<SessionCounters>,
    pub shutdown: watch::Receiver<bool>,
}

/// How a session task ended.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: u64,
    /// `Idle` after an orderly release, `Rejected` for policy refusals.
    pub state: SessionState,
    pub reached_established: bool,
    pub error: Option<SessionError>,
}

/// Run an outbound session to a bootstrap peer until it ends.
pub async fn run_outbound(
    ctx: &SessionContext,
    session_id: u64,
    peer: &BootstrapPeer,
) -> SessionOutcome {
    let mut session = Session::new(ctx, session_id, PeerOrigin::Bootstrap);
    let result = session.drive_outbound(peer).await;
    session.finish(result).await
}

/// Run an accepted connection until it ends.
pub async fn run_inbound(
    ctx: &SessionContext,
    session_id: u64,
    stream: TcpStream,
    remote: SocketAddr,
) -> SessionOutcome {
    let mut session = Session::new(ctx, session_id, PeerOrigin::Inbound);
    let result = session.drive_inbound(stream, remote).await;
    session.finish(result).await
}

struct Session<'a> {
    ctx: &'a SessionContext,
    id: u64,
    origin: PeerOrigin,
    state: SessionState,
    reached_established: bool,
}

impl<'a> Session<'a> {
    fn new(ctx: &'a SessionContext, id: u64, origin: PeerOrigin) -> Self {
        Self {
            ctx,
            id,
            origin,
            state: SessionState::Idle,
            reached_established: false,
        }
    }

    fn advance(&mut self, event: SessionEvent) -> SessionResult<()> {
        let next = self.state.on(event)?;
        debug!(
            session = self.id,
            from = %self.state,
            to = %next,
            event = event.as_str(),
            "[vx-06] Session transition"
        );
        self.state = next;
        self.ctx.sessions.set_state(self.id, next);
        if next == SessionState::Established {
            self.reached_established = true;
        }
        Ok(())
    }

    // =========================================================================
    // Transport and channel
    // =========================================================================

    async fn drive_outbound(&mut self, peer: &BootstrapPeer) -> SessionResult<()> {
        self.advance(SessionEvent::Start)?;
        let ctx = self.ctx;
        let connect = async {
            let stream = tokio::time::timeout(
                ctx.config.connect_timeout,
                TcpStream::connect(peer.session_addr()),
            )
            .await
            .map_err(|_| SessionError::Timeout {
                stage: "tcp connect",
            })??;
            stream.set_nodelay(true)?;
            Ok::<_, SessionError>(stream)
        };
        let mut stream = until_shutdown(ctx.shutdown.clone(), connect).await?;
        self.advance(SessionEvent::TransportReady)?;

        let channel = until_shutdown(ctx.shutdown.clone(), async {
            ctx.channels
                .connect(peer.handshake_addr(), peer.expected_id)
                .await
                .map_err(SessionError::from)
        })
        .await?;
        write_preamble(&mut stream, channel.remote_spi()).await?;
        self.advance(SessionEvent::ChannelEstablished)?;
        self.open_and_run(stream, channel).await
    }

    async fn drive_inbound(&mut self, mut stream: TcpStream, remote: SocketAddr) -> SessionResult<()> {
        self.advance(SessionEvent::Start)?;
        let ctx = self.ctx;
        let preamble = async {
            tokio::time::timeout(ctx.config.open_timeout, read_preamble(&mut stream))
                .await
                .map_err(|_| SessionError::Timeout { stage: "preamble" })?
        };
        let spi = until_shutdown(ctx.shutdown.clone(), preamble).await?;
        self.advance(SessionEvent::TransportReady)?;

        let channel = until_shutdown(ctx.shutdown.clone(), async {
            ctx.channels
                .claim(spi, remote.ip(), ctx.config.claim_timeout)
                .await
                .map_err(SessionError::from)
        })
        .await?;
        self.advance(SessionEvent::ChannelEstablished)?;
        self.open_and_run(stream, channel).await
    }

    // =========================================================================
    // Open exchange
    // =========================================================================

    async fn open_and_run(
        &mut self,
        stream: TcpStream,
        channel: SecureChannel,
    ) -> SessionResult<()> {
        let ctx = self.ctx;
        let peer = channel.peer().clone();
        ctx.sessions
            .set_peer(self.id, peer.id(), peer.tier(), channel.id());

        let (read_half, writer) = stream.into_split();
        let (mut frames, reader) = spawn_reader(read_half);
        let _reader = ReaderGuard(reader);
        let mut link = Link {
            channel,
            writer,
            write_limit: ctx.config.open_timeout,
        };

        let result = self
            .exchange_open(&mut link, &mut frames, &peer)
            .await;
        let remote_open = match result {
            Ok(open) => open,
            Err(e) => {
                link.notify(&e).await;
                return Err(e);
            }
        };
        self.advance(SessionEvent::OpenAccepted)?;

        let result = self
            .run_established(&mut link, &mut frames, &peer, &remote_open)
            .await;
        ctx.sessions.set_traffic(self.id, link.channel.stats());
        if let Err(e) = &result {
            link.notify(e).await;
        }
        result
    }

    async fn exchange_open(
        &mut self,
        link: &mut Link,
        frames: &mut FrameRx,
        peer: &NodeIdentity,
    ) -> SessionResult<Open> {
        let ctx = self.ctx;
        let ours = Open {
            identity: ctx.local.clone(),
            hold_time_secs: ctx.config.hold_time_secs,
            capabilities: Capabilities::default(),
        };
        link.send(&SessionMessage::Open(ours)).await?;

        let received = tokio::time::timeout(ctx.config.open_timeout, link.recv(frames))
            .await
            .map_err(|_| SessionError::Timeout { stage: "open" })??;
        let open = match received {
            SessionMessage::Open(open) => open,
            SessionMessage::Notification { code, reason } => {
                return Err(SessionError::RemoteNotification { code, reason })
            }
            other => {
                return Err(SessionError::protocol(format!(
                    "expected Open, got {}",
                    other.kind()
                )))
            }
        };
        self.accept_open(&open, peer)?;
        Ok(open)
    }

    /// Checks run on the peer's Open, in order.
    fn accept_open(&self, open: &Open, peer: &NodeIdentity) -> SessionResult<()> {
        let ctx = self.ctx;
        check_open_identity(&open.identity, peer)?;
        if open.hold_time_secs < MIN_HOLD_TIME_SECS {
            return Err(SessionError::protocol(format!(
                "hold time {}s below minimum {}s",
                open.hold_time_secs, MIN_HOLD_TIME_SECS
            )));
        }
        check_adjacency(ctx.local.tier(), peer.tier())?;
        match ctx.sessions.claim(self.id, peer) {
            Claim::Claimed => {}
            Claim::Duplicate { holder } => {
                debug!(
                    "[vx-06] Session {} duplicates session {} with {}",
                    self.id,
                    holder,
                    peer.id()
                );
                return Err(SessionError::DuplicateSession { id: peer.id() });
            }
            Claim::Collision => {
                return Err(SessionError::IdentityCollision { id: peer.id() });
            }
        }
        let max = ctx.local.tier().max_peers();
        if self.origin == PeerOrigin::Inbound && ctx.sessions.established_count() >= max {
            return Err(SessionError::CapacityExceeded {
                tier: ctx.local.tier(),
                max,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Established
    // =========================================================================

    async fn run_established(
        &mut self,
        link: &mut Link,
        frames: &mut FrameRx,
        peer: &NodeIdentity,
        remote_open: &Open,
    ) -> SessionResult<()> {
        let ctx = self.ctx;
        let hold = negotiate_hold_time(ctx.config.hold_time_secs, remote_open.hold_time_secs);
        let keepalive_every = keepalive_interval(ctx.config.keepalive, hold);
        let rekey_every = ctx.config.rekey_interval;
        let rekey_enabled = remote_open.capabilities.rekey && !rekey_every.is_zero();
        link.write_limit = hold;

        let (outbox, mut outbox_rx) = mpsc::unbounded_channel();
        ctx.hub.attach(peer, outbox)?;
        let _detach = DetachGuard {
            hub: &ctx.hub,
            peer: peer.id(),
        };
        SessionCounters::bump(&ctx.counters.established);
        info!(
            "[vx-06] Session {} established with {} (hold {}s, keepalive {}s)",
            self.id,
            peer,
            hold.as_secs(),
            keepalive_every.as_secs()
        );

        let start = Instant::now();
        let mut keepalive = tokio::time::interval_at(start + keepalive_every, keepalive_every);
        let mut rekey = tokio::time::interval_at(
            start + rekey_every.max(Duration::from_secs(1)),
            rekey_every.max(Duration::from_secs(1)),
        );
        let hold_timer = tokio::time::sleep(hold);
        tokio::pin!(hold_timer);
        let mut shutdown = ctx.shutdown.clone();

        loop {
            tokio::select! {
                _ = &mut hold_timer => {
                    return Err(SessionError::HoldTimerExpired { secs: hold.as_secs() });
                }
                _ = keepalive.tick() => {
                    link.send(&SessionMessage::Keepalive).await?;
                }
                _ = rekey.tick(), if rekey_enabled => {
                    link.rekey().await?;
                }
                Some(message) = outbox_rx.recv() => {
                    link.send(&message).await?;
                }
                frame = frames.recv() => {
                    let frame = frame.ok_or(SessionError::PeerClosed)??;
                    let message = link.open(&frame)?;
                    hold_timer.as_mut().reset(Instant::now() + hold);
                    self.handle(link, peer, message)?;
                    ctx.sessions.set_traffic(self.id, link.channel.stats());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(SessionError::Shutdown);
                    }
                }
            }
        }
    }

    fn handle(&self, link: &mut Link, peer: &NodeIdentity, message: SessionMessage) -> SessionResult<()> {
        match message {
            SessionMessage::Keepalive => Ok(()),
            SessionMessage::RouteUpdate(delta) => {
                debug!(
                    "[vx-06] {} routes announced, {} withdrawn by {}",
                    delta.announce.len(),
                    delta.withdraw.len(),
                    peer.id()
                );
                self.ctx.hub.apply_route_update(peer.id(), delta)
            }
            SessionMessage::ServiceUpdate(delta) => {
                self.ctx.hub.apply_service_update(peer.id(), delta)
            }
            SessionMessage::Rekey { nonce } => {
                let generation = link.channel.rekey_recv(&nonce)?;
                debug!(
                    "[vx-06] {} moved to receive generation {}",
                    peer.id(),
                    generation
                );
                Ok(())
            }
            SessionMessage::Notification { code, reason } => {
                Err(SessionError::RemoteNotification { code, reason })
            }
            SessionMessage::Open(_) => Err(SessionError::protocol("Open after establishment")),
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    async fn finish(mut self, result: SessionResult<()>) -> SessionOutcome {
        let error = result.err();
        let event = match &error {
            Some(e) => {
                self.ctx.counters.record(e);
                self.ctx.sessions.set_error(self.id, e);
                closing_event(e)
            }
            None => SessionEvent::Close,
        };
        let event = if self.state.on(event).is_ok() {
            event
        } else {
            SessionEvent::Failure
        };
        if let Err(e) = self.advance(event) {
            warn!("[vx-06] Session {} could not close: {}", self.id, e);
        }
        self.ctx.sessions.release(self.id);

        match (&error, self.state) {
            (Some(e), SessionState::Rejected) => {
                warn!("[vx-06] Session {} rejected: {}", self.id, e)
            }
            (Some(e), _) if self.reached_established => {
                info!("[vx-06] Session {} closed: {}", self.id, e)
            }
            (Some(e), _) => debug!("[vx-06] Session {} failed: {}", self.id, e),
            (None, _) => {}
        }
        if self.state == SessionState::Closing {
            let _ = self.advance(SessionEvent::Released);
        }
        SessionOutcome {
            session_id: self.id,
            state: self.state,
            reached_established: self.reached_established,
            error,
        }
    }
}

fn closing_event(error: &SessionError) -> SessionEvent {
    match error {
        SessionError::IllegalAdjacency { .. }
        | SessionError::UnknownTier { .. }
        | SessionError::RemoteNotification {
            code: NotificationCode::IllegalAdjacency,
            ..
        } => SessionEvent::AdjacencyViolation,
        SessionError::IdentityCollision { .. }
        | SessionError::RemoteNotification {
            code: NotificationCode::IdentityCollision,
            ..
        } => SessionEvent::IdentityCollision,
        SessionError::HoldTimerExpired { .. } => SessionEvent::HoldExpired,
        SessionError::Shutdown => SessionEvent::Close,
        _ => SessionEvent::Failure,
    }
}

type FrameRx = mpsc::Receiver<SessionResult<SealedFrame>>;

/// A channel bound to the write half of its connection.
struct Link {
    channel: SecureChannel,
    writer: OwnedWriteHalf,
    /// Longest a single frame write may stay pending: the open timeout
    /// until established, then the negotiated hold time.
    write_limit: Duration,
}

impl Link {
    async fn send(&mut self, message: &SessionMessage) -> SessionResult<()> {
        let bytes = message.encode()?;
        let frame = self.channel.seal(&bytes)?;
        write_frame_within(&mut self.writer, &frame, self.write_limit).await
    }

    fn open(&mut self, frame: &SealedFrame) -> SessionResult<SessionMessage> {
        let plaintext = self.channel.open(frame)?;
        SessionMessage::decode(&plaintext)
    }

    async fn recv(&mut self, frames: &mut FrameRx) -> SessionResult<SessionMessage> {
        let frame = frames.recv().await.ok_or(SessionError::PeerClosed)??;
        self.open(&frame)
    }

    /// Announce a fresh nonce, then switch our sending direction to it.
    async fn rekey(&mut self) -> SessionResult<()> {
        let nonce: [u8; 32] = rand::random();
        self.send(&SessionMessage::Rekey { nonce }).await?;
        let generation = self.channel.rekey_send(&nonce)?;
        debug!(
            "[vx-06] Channel {} moved to send generation {}",
            self.channel.id(),
            generation
        );
        Ok(())
    }

    /// Best effort notification before closing.
    async fn notify(&mut self, error: &SessionError) {
        let Some(code) = error.notification() else {
            return;
        };
        let message = SessionMessage::notification(code, error.to_string());
        let _ = tokio::time::timeout(Duration::from_secs(1), self.send(&message)).await;
    }
}

struct ReaderGuard(JoinHandle<()>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Detaches the session from the hub however the established loop exits.
struct DetachGuard<'a> {
    hub: &'a Arc<RoutingHub>,
    peer: NodeId,
}

impl Drop for DetachGuard<'_> {
    fn drop(&mut self) {
        self.hub.detach(self.peer);
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
pub(crate) async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn until_shutdown<T>(
    shutdown: watch::Receiver<bool>,
    work: impl Future<Output = SessionResult<T>>,
) -> SessionResult<T> {
    tokio::select! {
        result = work => result,
        _ = wait_for_shutdown(shutdown) => Err(SessionError::Shutdown),
    }
}
