//! Peer engine: binds the sockets and owns every background task of a node.

use super::bootstrap::run_bootstrap;
use super::hub::{HubServices, HubSnapshot, RoutingHub};
use super::session::{run_inbound, SessionConfig, SessionContext, SessionCounters};
use super::sessions::{SessionInfo, SessionTable};
use crate::domain::{BootstrapPeer, PeerOrigin};
use crate::error::SessionResult;
use parking_lot::Mutex;
use serde::Serialize;
use shared_types::{BackoffPolicy, TimeSource};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use vx_01_tier_identity::NodeIdentity;
use vx_02_secure_channel::{ChannelConfig, ChannelManager, ChannelStats, Credential, LocalParams};
use vx_03_route_table::{ExportPolicy, IpNet, SelectionPolicy};
use vx_04_service_registry::ServiceRecord;
use vx_05_name_gate::{GateStats, NameGate, ReservedNames, Resolution};

/// Default UDP port for channel handshakes.
pub const DEFAULT_HANDSHAKE_PORT: u16 = 4500;
/// Default TCP port for sessions.
pub const DEFAULT_SESSION_PORT: u16 = 1179;

/// A service hosted on this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalService {
    pub name: String,
    pub fqdn: String,
    pub port: u16,
}

/// Everything a node needs to run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub identity: NodeIdentity,
    pub credential: Credential,
    pub session_bind: SocketAddr,
    pub handshake_bind: SocketAddr,
    pub bootstrap: Vec<BootstrapPeer>,
    pub session: SessionConfig,
    pub channel: ChannelConfig,
    /// Delay between reconnection attempts to a bootstrap peer.
    pub reconnect: BackoffPolicy,
    pub export: ExportPolicy,
    pub selection: SelectionPolicy,
    /// Prefixes this node originates.
    pub originate: Vec<IpNet>,
    pub services: Vec<LocalService>,
    pub service_ttl_secs: u32,
    /// Re-announce period for local service records.
    pub service_refresh: Duration,
    /// Sweep period for expired service records.
    pub expiry_sweep: Duration,
    pub reserved: ReservedNames,
}

impl EngineConfig {
    /// Defaults for everything but identity and credential.
    pub fn new(identity: NodeIdentity, credential: Credential) -> Self {
        let any: IpAddr = Ipv4Addr::UNSPECIFIED.into();
        Self {
            identity,
            credential,
            session_bind: SocketAddr::new(any, DEFAULT_SESSION_PORT),
            handshake_bind: SocketAddr::new(any, DEFAULT_HANDSHAKE_PORT),
            bootstrap: Vec::new(),
            session: SessionConfig::default(),
            channel: ChannelConfig::default(),
            reconnect: BackoffPolicy::default(),
            export: ExportPolicy::default(),
            selection: SelectionPolicy::default(),
            originate: Vec::new(),
            services: Vec::new(),
            service_ttl_secs: ServiceRecord::DEFAULT_TTL_SECS,
            service_refresh: Duration::from_secs(120),
            expiry_sweep: Duration::from_secs(10),
            reserved: ReservedNames::default(),
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    pub sessions_established: u64,
    pub handshake_failures: u64,
    pub rejected_adjacencies: u64,
    pub identity_collisions: u64,
    pub protocol_errors: u64,
    pub capacity_refusals: u64,
    pub withdraw_events: u64,
}

/// Point-in-time view of a running node.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub identity: NodeIdentity,
    pub sessions: Vec<SessionInfo>,
    pub hub: HubSnapshot,
    pub channels: ChannelStats,
    pub names: GateStats,
    pub counters: EngineCounters,
}

pub struct PeerEngine {
    ctx: Arc<SessionContext>,
    gate: NameGate<HubServices>,
    session_addr: SocketAddr,
    handshake_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerEngine {
    /// Bind both sockets, load local routes and services, and start the
    /// receiver, listener, bootstrap and maintenance tasks.
    pub async fn start(config: EngineConfig, time: Arc<dyn TimeSource>) -> SessionResult<Self> {
        config.identity.validate()?;
        let identity = config.identity.clone();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let local = LocalParams::new(identity.clone(), config.credential.clone())
            .with_time_source(Arc::clone(&time));
        let channels = ChannelManager::bind(
            config.handshake_bind,
            local,
            config.channel.clone(),
            Arc::clone(&time),
        )
        .await?;
        let listener = TcpListener::bind(config.session_bind).await?;
        let session_addr = listener.local_addr()?;
        let handshake_addr = channels.local_addr()?;

        let hub = Arc::new(RoutingHub::new(
            identity.clone(),
            config.selection.clone(),
            config.export.clone(),
            Arc::clone(&time),
        ));
        for prefix in &config.originate {
            hub.originate(*prefix);
        }
        for service in &config.services {
            let record = ServiceRecord::new(
                service.name.clone(),
                service.fqdn.clone(),
                service.port,
                identity.id(),
                identity.address(),
                config.service_ttl_secs,
            )?;
            hub.register_service(record)?;
        }

        let ctx = Arc::new(SessionContext {
            local: identity.clone(),
            config: config.session.clone(),
            channels: Arc::clone(&channels),
            hub: Arc::clone(&hub),
            sessions: Arc::new(SessionTable::new(identity.id())),
            counters: Arc::new(SessionCounters::default()),
            shutdown: shutdown_rx.clone(),
        });

        let mut tasks = vec![
            channels.spawn_receiver(shutdown_rx.clone()),
            tokio::spawn(accept_loop(Arc::clone(&ctx), listener)),
            tokio::spawn(maintenance_loop(
                Arc::clone(&hub),
                config.service_refresh,
                config.expiry_sweep,
                shutdown_rx,
            )),
        ];
        for peer in &config.bootstrap {
            tasks.push(tokio::spawn(run_bootstrap(
                Arc::clone(&ctx),
                peer.clone(),
                config.reconnect,
            )));
        }

        info!(
            "[vx-06] Node {} up: sessions on {}, handshakes on {}, {} bootstrap peers",
            identity,
            session_addr,
            handshake_addr,
            config.bootstrap.len()
        );
        Ok(Self {
            gate: NameGate::new(HubServices(Arc::clone(&hub)), config.reserved),
            ctx,
            session_addr,
            handshake_addr,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.ctx.local
    }

    pub fn session_addr(&self) -> SocketAddr {
        self.session_addr
    }

    pub fn handshake_addr(&self) -> SocketAddr {
        self.handshake_addr
    }

    pub fn hub(&self) -> &Arc<RoutingHub> {
        &self.ctx.hub
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.ctx.channels
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.ctx.sessions.list()
    }

    /// Resolve a name through the gate.
    pub fn resolve(&self, query: &str) -> Resolution {
        self.gate.resolve(query)
    }

    pub fn counters(&self) -> EngineCounters {
        let c = &self.ctx.counters;
        EngineCounters {
            sessions_established: c.established.load(Ordering::Relaxed),
            handshake_failures: c.handshake_failures.load(Ordering::Relaxed),
            rejected_adjacencies: c.rejected_adjacencies.load(Ordering::Relaxed),
            identity_collisions: c.identity_collisions.load(Ordering::Relaxed),
            protocol_errors: c.protocol_errors.load(Ordering::Relaxed),
            capacity_refusals: c.capacity_refusals.load(Ordering::Relaxed),
            withdraw_events: self.ctx.hub.withdraw_events(),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            identity: self.ctx.local.clone(),
            sessions: self.sessions(),
            hub: self.ctx.hub.snapshot(),
            channels: self.ctx.channels.stats(),
            names: self.gate.stats(),
            counters: self.counters(),
        }
    }

    /// Signal every task to stop and wait for them. Established sessions
    /// send Cease and withdraw their contributions on the way out.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("[vx-06] Task ended abnormally: {}", e);
            }
        }
        info!("[vx-06] Node {} stopped", self.ctx.local);
    }
}

impl std::fmt::Debug for PeerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerEngine")
            .field("identity", &self.ctx.local)
            .field("session_addr", &self.session_addr)
            .field("handshake_addr", &self.handshake_addr)
            .finish_non_exhaustive()
    }
}

/// Accept session connections; each runs in its own task and is forgotten
/// once it ends.
async fn accept_loop(ctx: Arc<SessionContext>, listener: TcpListener) {
    let mut shutdown = ctx.shutdown.clone();
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("[vx-06] set_nodelay for {} failed: {}", remote, e);
                    }
                    let ctx = Arc::clone(&ctx);
                    running.spawn(async move {
                        let session_id = ctx.sessions.register(PeerOrigin::Inbound, remote, None);
                        let outcome = run_inbound(&ctx, session_id, stream, remote).await;
                        ctx.sessions.remove(outcome.session_id);
                    });
                }
                Err(e) => {
                    warn!("[vx-06] Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = running.join_next(), if !running.is_empty() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    while running.join_next().await.is_some() {}
    debug!("[vx-06] Session listener stopped");
}

/// Refresh local service records and sweep expired ones.
async fn maintenance_loop(
    hub: Arc<RoutingHub>,
    refresh_every: Duration,
    sweep_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut refresh = tokio::time::interval(refresh_every);
    let mut sweep = tokio::time::interval(sweep_every);
    refresh.tick().await;
    sweep.tick().await;
    loop {
        tokio::select! {
            _ = refresh.tick() => {
                let refreshed = hub.refresh_local();
                debug!("[vx-06] Refreshed {} local service records", refreshed);
            }
            _ = sweep.tick() => {
                let expired = hub.expire_services();
                if expired > 0 {
                    info!("[vx-06] Expired {} service records", expired);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
