//! Channel manager: drives handshakes over a UDP socket.
//!
//! One manager per node. It answers proposals from any address, runs
//! outbound exchanges for [`ChannelManager::connect`], and parks channels
//! completed as responder until the session layer claims them by SPI.

use crate::domain::{
    CooldownList, Handshake, HandshakeMessage, LocalParams, Proposal, Reject, RejectReason,
    SealedAuth, SecureChannel, MAX_DATAGRAM,
};
use crate::error::{ChannelError, ChannelResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared_types::{Backoff, BackoffPolicy, TimeSource};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vx_01_tier_identity::NodeId;

/// Handshake timing and failure policy.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Wait for each reply before retransmitting.
    pub handshake_timeout: Duration,
    /// Retransmissions after the first attempt.
    pub handshake_retries: u32,
    /// Pause between retransmissions.
    pub backoff: BackoffPolicy,
    /// Base cooldown after an authentication failure.
    pub auth_cooldown_secs: u64,
    /// Lifetime of responder state and unclaimed channels.
    pub pending_ttl: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            handshake_retries: 3,
            backoff: BackoffPolicy {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(30),
                jitter: true,
            },
            auth_cooldown_secs: 60,
            pending_ttl: Duration::from_secs(30),
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub handshakes_initiated: u64,
    pub handshakes_completed: u64,
    pub handshake_failures: u64,
    pub auth_failures: u64,
    pub rejects_sent: u64,
    pub datagrams_dropped: u64,
    pub cooling_down: u64,
}

#[derive(Debug, Default)]
struct Counters {
    initiated: AtomicU64,
    completed: AtomicU64,
    failures: AtomicU64,
    auth_failures: AtomicU64,
    rejects_sent: AtomicU64,
    dropped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Responding {
    handshake: Handshake,
    last_reply: Vec<u8>,
    created: Instant,
}

struct Completed {
    from: SocketAddr,
    channel: SecureChannel,
    created: Instant,
}

type Inbox = mpsc::UnboundedSender<(SocketAddr, HandshakeMessage)>;

pub struct ChannelManager {
    socket: UdpSocket,
    local: LocalParams,
    config: ChannelConfig,
    time: Arc<dyn TimeSource>,
    initiating: Mutex<HashMap<u64, Inbox>>,
    responding: Mutex<HashMap<(SocketAddr, u64), Responding>>,
    completed: Mutex<HashMap<u64, Completed>>,
    completed_notify: Notify,
    cooldown: Mutex<CooldownList>,
    counters: Counters,
}

impl ChannelManager {
    /// Bind the handshake socket.
    pub async fn bind(
        addr: SocketAddr,
        local: LocalParams,
        config: ChannelConfig,
        time: Arc<dyn TimeSource>,
    ) -> ChannelResult<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        info!(
            "[vx-02] Handshake socket bound on {}",
            socket.local_addr()?
        );
        Ok(Arc::new(Self {
            socket,
            local,
            config,
            time,
            initiating: Mutex::new(HashMap::new()),
            responding: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            completed_notify: Notify::new(),
            cooldown: Mutex::new(CooldownList::new()),
            counters: Counters::default(),
        }))
    }

    pub fn local_addr(&self) -> ChannelResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn local(&self) -> &LocalParams {
        &self.local
    }

    pub fn stats(&self) -> ChannelStats {
        let c = &self.counters;
        ChannelStats {
            handshakes_initiated: c.initiated.load(Ordering::Relaxed),
            handshakes_completed: c.completed.load(Ordering::Relaxed),
            handshake_failures: c.failures.load(Ordering::Relaxed),
            auth_failures: c.auth_failures.load(Ordering::Relaxed),
            rejects_sent: c.rejects_sent.load(Ordering::Relaxed),
            datagrams_dropped: c.dropped.load(Ordering::Relaxed),
            cooling_down: self.cooldown.lock().count(self.time.now()) as u64,
        }
    }

    pub fn is_cooling(&self, address: IpAddr) -> bool {
        self.cooldown.lock().is_cooling(&address, self.time.now())
    }

    /// Put an address on the cooldown list.
    pub fn cool_down(&self, address: IpAddr, reason: &str) {
        let until = self.cooldown.lock().cool_down(
            address,
            self.time.now(),
            self.config.auth_cooldown_secs,
            reason,
        );
        warn!(
            "[vx-02] {} cooling down until {} ({})",
            address,
            until.as_secs(),
            reason
        );
    }

    /// Spawn the receive loop. Runs until `shutdown` flips to true.
    pub fn spawn_receiver(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM + 1];
            let mut gc = tokio::time::interval(manager.config.pending_ttl);
            loop {
                tokio::select! {
                    received = manager.socket.recv_from(&mut buf) => match received {
                        Ok((len, from)) => manager.handle_datagram(&buf[..len], from).await,
                        Err(e) => debug!("[vx-02] recv_from failed: {}", e),
                    },
                    _ = gc.tick() => manager.gc(),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            manager.initiating.lock().clear();
            manager.completed_notify.notify_waiters();
            info!("[vx-02] Handshake receiver stopped");
        })
    }

    /// Dispatch one datagram.
    pub async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        let message = match HandshakeMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                bump(&self.counters.dropped);
                debug!("[vx-02] Dropping datagram from {}: {}", from, e);
                return;
            }
        };
        match message {
            HandshakeMessage::Proposal(proposal) => self.on_proposal(proposal, from).await,
            HandshakeMessage::Auth(auth) => self.on_auth(auth, from).await,
            reply => {
                let spi = reply.initiator_spi();
                let delivered = self
                    .initiating
                    .lock()
                    .get(&spi)
                    .is_some_and(|inbox| inbox.send((from, reply)).is_ok());
                if !delivered {
                    bump(&self.counters.dropped);
                    debug!("[vx-02] No exchange for spi {:#x} from {}", spi, from);
                }
            }
        }
    }

    async fn on_proposal(&self, proposal: Proposal, from: SocketAddr) {
        if self.is_cooling(from.ip()) {
            self.send_reject(from, proposal.initiator_spi, RejectReason::CoolingDown)
                .await;
            return;
        }
        let key = (from, proposal.initiator_spi);
        let outgoing = {
            let mut responding = self.responding.lock();
            if let Some(slot) = responding.get(&key) {
                // Retransmitted proposal: repeat the same answer.
                Ok(slot.last_reply.clone())
            } else {
                match Handshake::respond(self.local.clone(), &proposal)
                    .and_then(|(handshake, reply)| Ok((handshake, reply.encode()?)))
                {
                    Ok((handshake, bytes)) => {
                        responding.insert(
                            key,
                            Responding {
                                handshake,
                                last_reply: bytes.clone(),
                                created: Instant::now(),
                            },
                        );
                        Ok(bytes)
                    }
                    Err(e) => Err(e),
                }
            }
        };
        match outgoing {
            Ok(bytes) => self.send(&bytes, from).await,
            Err(ChannelError::Rejected { reason }) => {
                debug!("[vx-02] Rejecting proposal from {}: {:?}", from, reason);
                self.send_reject(from, proposal.initiator_spi, reason).await;
            }
            Err(e) => {
                bump(&self.counters.dropped);
                debug!("[vx-02] Unusable proposal from {}: {}", from, e);
            }
        }
    }

    async fn on_auth(&self, auth: SealedAuth, from: SocketAddr) {
        let key = (from, auth.initiator_spi);
        let outgoing = {
            let mut responding = self.responding.lock();
            let Some(slot) = responding.get_mut(&key) else {
                bump(&self.counters.dropped);
                debug!(
                    "[vx-02] Auth for unknown exchange {:#x} from {}",
                    auth.initiator_spi, from
                );
                return;
            };
            if slot.handshake.is_established() {
                Ok(slot.last_reply.clone())
            } else {
                match slot
                    .handshake
                    .on_auth(&auth)
                    .and_then(|(reply, channel)| Ok((reply.encode()?, channel)))
                {
                    Ok((bytes, channel)) => {
                        slot.last_reply = bytes.clone();
                        let spi = channel.local_spi();
                        info!(
                            "[vx-02] Channel {:#x} established with {} at {}",
                            spi,
                            channel.peer(),
                            from
                        );
                        self.completed.lock().insert(
                            spi,
                            Completed {
                                from,
                                channel,
                                created: Instant::now(),
                            },
                        );
                        Ok(bytes)
                    }
                    Err(e) => {
                        if slot.handshake.is_failed() {
                            responding.remove(&key);
                        }
                        Err(e)
                    }
                }
            }
        };
        match outgoing {
            Ok(bytes) => {
                self.cooldown.lock().clear(&from.ip());
                bump(&self.counters.completed);
                self.completed_notify.notify_waiters();
                self.send(&bytes, from).await;
            }
            Err(e) if e.is_auth_failure() => {
                bump(&self.counters.auth_failures);
                bump(&self.counters.failures);
                self.cool_down(from.ip(), &e.to_string());
                self.send_reject(from, auth.initiator_spi, RejectReason::AuthenticationFailed)
                    .await;
            }
            Err(e) => {
                bump(&self.counters.failures);
                debug!("[vx-02] Auth from {} failed: {}", from, e);
            }
        }
    }

    /// Run a handshake as initiator.
    ///
    /// Fails immediately if `remote` is cooling down. With `expected_peer`
    /// set, a responder authenticating as any other node is an error.
    pub async fn connect(
        &self,
        remote: SocketAddr,
        expected_peer: Option<NodeId>,
    ) -> ChannelResult<SecureChannel> {
        if self.is_cooling(remote.ip()) {
            return Err(ChannelError::CoolingDown {
                address: remote.ip(),
            });
        }
        bump(&self.counters.initiated);
        let (mut handshake, proposal) = Handshake::initiate(self.local.clone(), expected_peer);
        let spi = handshake.local_spi();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.initiating.lock().insert(spi, tx);
        let _guard = InitiatingGuard { manager: self, spi };

        let result = self
            .run_initiator(&mut handshake, proposal, remote, &mut rx)
            .await;
        match &result {
            Ok(channel) => {
                self.cooldown.lock().clear(&remote.ip());
                bump(&self.counters.completed);
                info!(
                    "[vx-02] Channel {:#x} established with {} at {}",
                    spi,
                    channel.peer(),
                    remote
                );
            }
            Err(e) => {
                bump(&self.counters.failures);
                if e.is_auth_failure() {
                    bump(&self.counters.auth_failures);
                    self.cool_down(remote.ip(), &e.to_string());
                } else {
                    debug!("[vx-02] Handshake with {} failed: {}", remote, e);
                }
            }
        }
        result
    }

    async fn run_initiator(
        &self,
        handshake: &mut Handshake,
        proposal: HandshakeMessage,
        remote: SocketAddr,
        rx: &mut mpsc::UnboundedReceiver<(SocketAddr, HandshakeMessage)>,
    ) -> ChannelResult<SecureChannel> {
        let reply = self
            .exchange(&proposal.encode()?, remote, rx, |m| {
                matches!(m, HandshakeMessage::ProposalReply(_))
            })
            .await?;
        let auth = match reply {
            HandshakeMessage::ProposalReply(reply) => handshake.on_reply(&reply)?,
            other => return Err(unexpected(handshake, &other)),
        };
        let auth_reply = self
            .exchange(&auth.encode()?, remote, rx, |m| {
                matches!(m, HandshakeMessage::AuthReply(_))
            })
            .await?;
        match auth_reply {
            HandshakeMessage::AuthReply(auth_reply) => handshake.on_auth_reply(&auth_reply),
            other => Err(unexpected(handshake, &other)),
        }
    }

    /// Send `bytes` and wait for an accepted message or a reject from
    /// `remote`, retransmitting with backoff.
    async fn exchange(
        &self,
        bytes: &[u8],
        remote: SocketAddr,
        rx: &mut mpsc::UnboundedReceiver<(SocketAddr, HandshakeMessage)>,
        accept: impl Fn(&HandshakeMessage) -> bool,
    ) -> ChannelResult<HandshakeMessage> {
        let mut backoff = Backoff::new(self.config.backoff);
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.send(bytes, remote).await;
            let deadline = Instant::now() + self.config.handshake_timeout;
            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some((from, message))) if from == remote => {
                        if let HandshakeMessage::Reject(Reject { reason, .. }) = message {
                            return Err(ChannelError::Rejected { reason });
                        }
                        if accept(&message) {
                            return Ok(message);
                        }
                        debug!("[vx-02] Ignoring stale {} from {}", message.kind(), from);
                    }
                    Ok(Some((from, message))) => {
                        debug!("[vx-02] Ignoring {} from {}", message.kind(), from);
                    }
                    Ok(None) => return Err(ChannelError::Shutdown),
                    Err(_) => break,
                }
            }
            if attempts > self.config.handshake_retries {
                return Err(ChannelError::HandshakeTimeout { remote, attempts });
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    /// Take a channel this node completed as responder.
    ///
    /// Waits up to `wait` for the handshake to finish. The channel must have
    /// been negotiated from `from` so one host cannot claim another's SPI.
    pub async fn claim(&self, spi: u64, from: IpAddr, wait: Duration) -> ChannelResult<SecureChannel> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.completed_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut completed = self.completed.lock();
                if completed.get(&spi).is_some_and(|c| c.from.ip() == from) {
                    if let Some(entry) = completed.remove(&spi) {
                        return Ok(entry.channel);
                    }
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ChannelError::UnknownChannel { spi });
            }
        }
    }

    fn gc(&self) {
        let ttl = self.config.pending_ttl;
        self.responding
            .lock()
            .retain(|_, slot| slot.created.elapsed() < ttl);
        let mut completed = self.completed.lock();
        let before = completed.len();
        completed.retain(|_, entry| entry.created.elapsed() < ttl);
        let expired = before - completed.len();
        drop(completed);
        if expired > 0 {
            debug!("[vx-02] Discarded {} unclaimed channels", expired);
        }
        self.cooldown.lock().gc_expired(self.time.now());
    }

    async fn send(&self, bytes: &[u8], to: SocketAddr) {
        if let Err(e) = self.socket.send_to(bytes, to).await {
            debug!("[vx-02] send_to {} failed: {}", to, e);
        }
    }

    async fn send_reject(&self, to: SocketAddr, initiator_spi: u64, reason: RejectReason) {
        let message = HandshakeMessage::Reject(Reject {
            initiator_spi,
            reason,
        });
        if let Ok(bytes) = message.encode() {
            bump(&self.counters.rejects_sent);
            self.send(&bytes, to).await;
        }
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("local", &self.local)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

struct InitiatingGuard<'a> {
    manager: &'a ChannelManager,
    spi: u64,
}

impl Drop for InitiatingGuard<'_> {
    fn drop(&mut self) {
        self.manager.initiating.lock().remove(&self.spi);
    }
}

fn unexpected(handshake: &Handshake, message: &HandshakeMessage) -> ChannelError {
    ChannelError::UnexpectedMessage {
        state: handshake.state_name(),
        message: message.kind(),
    }
}
