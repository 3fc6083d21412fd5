use super::*;
use crate::adapters::{read_frame, write_frame, write_preamble};
use crate::domain::{
    BootstrapPeer, Capabilities, NotificationCode, Open, PeerOrigin, SessionMessage, SessionState,
};
use crate::error::SessionError;
use shared_types::{BackoffPolicy, ManualTimeSource, SystemTimeSource, TimeSource};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use vx_01_tier_identity::{NodeId, NodeIdentity, Tier};
use vx_02_secure_channel::{ChannelConfig, ChannelManager, Credential, LocalParams, SecureChannel};
use vx_03_route_table::{ExportPolicy, IpNet, RouteDelta, RouteEntry, SelectionPolicy};
use vx_04_service_registry::{ServiceDelta, ServiceRecord};
use vx_05_name_gate::{NameGate, ReservedNames, Resolution};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn make_identity(id: u32, tier: Tier) -> NodeIdentity {
    NodeIdentity::new(NodeId::new(id), tier, LOCALHOST, format!("node-{id}")).unwrap()
}

fn prefix(s: &str) -> IpNet {
    s.parse().unwrap()
}

// =============================================================================
// Routing hub
// =============================================================================

fn make_hub(id: u32, tier: Tier) -> (Arc<RoutingHub>, Arc<ManualTimeSource>) {
    let clock = Arc::new(ManualTimeSource::new(1_000));
    let time: Arc<dyn TimeSource> = clock.clone();
    let hub = RoutingHub::new(
        make_identity(id, tier),
        SelectionPolicy::default(),
        ExportPolicy::default(),
        time,
    );
    (Arc::new(hub), clock)
}

fn attach(hub: &RoutingHub, id: u32, tier: Tier) -> mpsc::UnboundedReceiver<SessionMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    hub.attach(&make_identity(id, tier), tx).unwrap();
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionMessage>) -> Vec<SessionMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

fn announced_prefixes(messages: &[SessionMessage]) -> Vec<IpNet> {
    messages
        .iter()
        .filter_map(|m| match m {
            SessionMessage::RouteUpdate(delta) => Some(delta.announce.iter().map(|e| e.prefix)),
            _ => None,
        })
        .flatten()
        .collect()
}

fn withdrawn_prefixes(messages: &[SessionMessage]) -> Vec<IpNet> {
    messages
        .iter()
        .filter_map(|m| match m {
            SessionMessage::RouteUpdate(delta) => Some(delta.withdraw.iter().copied()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn edge_announce(edge: u32, net: &str) -> RouteDelta {
    RouteDelta {
        announce: vec![RouteEntry::local(prefix(net), NodeId::new(edge)).exported_by(NodeId::new(edge))],
        withdraw: Vec::new(),
    }
}

fn make_service(owner: u32, fqdn: &str, port: u16) -> ServiceRecord {
    ServiceRecord::new("svc", fqdn, port, NodeId::new(owner), LOCALHOST, 300).unwrap()
}

#[test]
fn test_attach_sends_initial_sync() {
    let (hub, _) = make_hub(65_100, Tier::Regional);
    hub.originate(prefix("10.100.0.0/16"));

    let mut rx = attach(&hub, 66_000, Tier::Edge);
    let sent = drain(&mut rx);
    assert_eq!(announced_prefixes(&sent), vec![prefix("10.100.0.0/16")]);
    assert!(hub.is_attached(NodeId::new(66_000)));
}

#[test]
fn test_attach_twice_is_refused() {
    let (hub, _) = make_hub(65_100, Tier::Regional);
    let _rx = attach(&hub, 66_000, Tier::Edge);
    let (tx, _rx2) = mpsc::unbounded_channel();
    assert!(matches!(
        hub.attach(&make_identity(66_000, Tier::Edge), tx),
        Err(SessionError::DuplicateSession { .. })
    ));
}

#[test]
fn test_route_update_fans_out_to_other_sessions() {
    let (hub, _) = make_hub(65_100, Tier::Regional);
    let mut edge = attach(&hub, 66_000, Tier::Edge);
    let mut backbone = attach(&hub, 65_000, Tier::Backbone);
    drain(&mut edge);
    drain(&mut backbone);

    hub.apply_route_update(NodeId::new(66_000), edge_announce(66_000, "10.66.0.0/16"))
        .unwrap();

    assert_eq!(
        announced_prefixes(&drain(&mut backbone)),
        vec![prefix("10.66.0.0/16")]
    );
    // Split horizon.
    assert!(drain(&mut edge).is_empty());
    let best = hub.best_route(&prefix("10.66.0.0/16")).unwrap();
    assert_eq!(best.source, NodeId::new(66_000));
}

#[test]
fn test_edge_transit_announcement_is_not_imported() {
    let (hub, _) = make_hub(65_100, Tier::Regional);
    let _edge = attach(&hub, 66_000, Tier::Edge);
    let mut backbone = attach(&hub, 65_000, Tier::Backbone);
    drain(&mut backbone);

    let transit = RouteEntry::local(prefix("10.65.0.0/16"), NodeId::new(65_001))
        .exported_by(NodeId::new(65_001))
        .exported_by(NodeId::new(66_000));
    assert_eq!(transit.path, vec![NodeId::new(66_000), NodeId::new(65_001)]);
    let mut delta = edge_announce(66_000, "10.66.0.0/16");
    delta.announce.push(transit);
    hub.apply_route_update(NodeId::new(66_000), delta).unwrap();

    assert!(hub.best_route(&prefix("10.65.0.0/16")).is_none());
    assert!(hub.best_route(&prefix("10.66.0.0/16")).is_some());
    assert_eq!(
        announced_prefixes(&drain(&mut backbone)),
        vec![prefix("10.66.0.0/16")]
    );
    assert_eq!(hub.snapshot().route_stats.policy_rejected, 1);
}

#[test]
fn test_edge_imports_only_aggregates_and_neighbour_prefixes() {
    let (hub, _) = make_hub(66_000, Tier::Edge);
    let _regional = attach(&hub, 65_100, Tier::Regional);
    let learned = |net: &str| {
        RouteEntry::local(prefix(net), NodeId::new(65_000))
            .exported_by(NodeId::new(65_000))
            .exported_by(NodeId::new(65_100))
    };
    let own = RouteEntry::local(prefix("10.100.0.0/16"), NodeId::new(65_100))
        .exported_by(NodeId::new(65_100));
    let delta = RouteDelta {
        announce: vec![learned("10.0.0.0/8"), learned("10.200.0.0/16"), own],
        withdraw: Vec::new(),
    };
    hub.apply_route_update(NodeId::new(65_100), delta).unwrap();

    assert!(hub.best_route(&prefix("10.0.0.0/8")).is_some());
    assert!(hub.best_route(&prefix("10.100.0.0/16")).is_some());
    assert!(hub.best_route(&prefix("10.200.0.0/16")).is_none());
    assert_eq!(hub.snapshot().route_stats.policy_rejected, 1);
}

#[test]
fn test_closing_one_of_two_carriers_keeps_service() {
    let (hub, _) = make_hub(65_000, Tier::Backbone);
    let _first = attach(&hub, 65_100, Tier::Regional);
    let _second = attach(&hub, 65_101, Tier::Regional);
    for peer in [65_100, 65_101] {
        let delta = ServiceDelta {
            announce: vec![make_service(66_000, "chat.example.vx0", 6667)],
            withdraw: Vec::new(),
        };
        hub.apply_service_update(NodeId::new(peer), delta).unwrap();
    }

    let report = hub.detach(NodeId::new(65_101)).unwrap();
    assert_eq!(report.services_withdrawn, 0);
    assert!(hub.lookup("chat.example.vx0").is_some());

    let report = hub.detach(NodeId::new(65_100)).unwrap();
    assert_eq!(report.services_withdrawn, 1);
    assert!(hub.lookup("chat.example.vx0").is_none());
}

#[test]
fn test_update_from_unattached_peer_is_protocol_error() {
    let (hub, _) = make_hub(65_100, Tier::Regional);
    let err = hub
        .apply_route_update(NodeId::new(66_000), edge_announce(66_000, "10.66.0.0/16"))
        .unwrap_err();
    assert!(matches!(err, SessionError::Protocol { .. }));
    assert_eq!(hub.route_count(), 0);
}

#[test]
fn test_detach_withdraws_exactly_once() {
    let (hub, _) = make_hub(65_100, Tier::Regional);
    let _edge = attach(&hub, 66_000, Tier::Edge);
    let mut backbone = attach(&hub, 65_000, Tier::Backbone);
    hub.apply_route_update(NodeId::new(66_000), edge_announce(66_000, "10.66.0.0/16"))
        .unwrap();
    drain(&mut backbone);

    let report = hub.detach(NodeId::new(66_000)).unwrap();
    assert_eq!(report.routes_withdrawn, 1);
    assert_eq!(
        withdrawn_prefixes(&drain(&mut backbone)),
        vec![prefix("10.66.0.0/16")]
    );
    assert!(hub.detach(NodeId::new(66_000)).is_none());
    assert!(drain(&mut backbone).is_empty());
    assert_eq!(hub.withdraw_events(), 1);
    assert!(hub.best_route(&prefix("10.66.0.0/16")).is_none());
}

#[test]
fn test_services_propagate_upward_only() {
    let (hub, _) = make_hub(65_100, Tier::Regional);
    let mut edge_a = attach(&hub, 66_000, Tier::Edge);
    let mut edge_b = attach(&hub, 66_001, Tier::Edge);
    let mut backbone = attach(&hub, 65_000, Tier::Backbone);
    drain(&mut edge_b);
    drain(&mut backbone);

    let delta = ServiceDelta {
        announce: vec![make_service(66_000, "chat.example.vx0", 6667)],
        withdraw: Vec::new(),
    };
    hub.apply_service_update(NodeId::new(66_000), delta).unwrap();

    let upward = drain(&mut backbone);
    assert!(matches!(
        upward.as_slice(),
        [SessionMessage::ServiceUpdate(d)] if d.announce[0].fqdn == "chat.example.vx0"
    ));
    assert!(drain(&mut edge_b).is_empty());
    assert!(drain(&mut edge_a).is_empty());
    assert_eq!(hub.lookup("chat.example.vx0").unwrap().port, 6667);
}

#[test]
fn test_invalid_service_update_applies_nothing() {
    let (hub, _) = make_hub(65_100, Tier::Regional);
    let _edge = attach(&hub, 66_000, Tier::Edge);
    let mut bad = make_service(66_000, "ok.vx0", 80);
    bad.fqdn = "evil.example.com".into();
    let delta = ServiceDelta {
        announce: vec![make_service(66_000, "first.vx0", 80), bad],
        withdraw: Vec::new(),
    };
    let err = hub
        .apply_service_update(NodeId::new(66_000), delta)
        .unwrap_err();
    assert!(matches!(err, SessionError::Registry(_)));
    assert!(hub.lookup("first.vx0").is_none());
}

#[test]
fn test_service_expiry_withdraws_downstream() {
    let (hub, clock) = make_hub(65_100, Tier::Regional);
    let _edge = attach(&hub, 66_000, Tier::Edge);
    let mut backbone = attach(&hub, 65_000, Tier::Backbone);
    hub.apply_service_update(
        NodeId::new(66_000),
        ServiceDelta {
            announce: vec![make_service(66_000, "wiki.vx0", 80)],
            withdraw: Vec::new(),
        },
    )
    .unwrap();
    drain(&mut backbone);

    clock.advance(301);
    assert_eq!(hub.expire_services(), 1);
    assert!(hub.lookup("wiki.vx0").is_none());
    assert!(matches!(
        drain(&mut backbone).as_slice(),
        [SessionMessage::ServiceUpdate(d)] if d.withdraw == vec!["wiki.vx0".to_string()]
    ));
}

#[test]
fn test_local_service_refresh_keeps_record() {
    let (hub, clock) = make_hub(66_000, Tier::Edge);
    hub.register_service(make_service(66_000, "chat.example.vx0", 6667))
        .unwrap();
    clock.advance(200);
    assert_eq!(hub.refresh_local(), 1);
    clock.advance(200);
    assert_eq!(hub.expire_services(), 0);
    assert!(hub.lookup("chat.example.vx0").is_some());
}

#[test]
fn test_hub_backs_the_name_gate() {
    let (hub, _) = make_hub(66_000, Tier::Edge);
    hub.register_service(make_service(66_000, "chat.example.vx0", 6667))
        .unwrap();
    let gate = NameGate::new(HubServices(Arc::clone(&hub)), ReservedNames::default());
    assert!(matches!(
        gate.resolve("chat.example.vx0"),
        Resolution::Service { port: 6667, .. }
    ));
    assert!(gate.resolve("example.com").is_refused());
}

#[test]
fn test_snapshot_lists_attached_sessions() {
    let (hub, _) = make_hub(65_100, Tier::Regional);
    let _b = attach(&hub, 65_000, Tier::Backbone);
    let _e = attach(&hub, 66_000, Tier::Edge);
    let snapshot = hub.snapshot();
    let peers: Vec<NodeId> = snapshot.attached.iter().map(|a| a.peer).collect();
    assert_eq!(peers, vec![NodeId::new(65_000), NodeId::new(66_000)]);
}

// =============================================================================
// Session table
// =============================================================================

fn any_remote() -> SocketAddr {
    SocketAddr::new(LOCALHOST, 40_000)
}

#[test]
fn test_claim_duplicate_and_collision() {
    let table = SessionTable::new(NodeId::new(65_100));
    let first = table.register(PeerOrigin::Inbound, any_remote(), None);
    let second = table.register(PeerOrigin::Inbound, any_remote(), None);
    let third = table.register(PeerOrigin::Inbound, any_remote(), None);
    let edge = make_identity(66_000, Tier::Edge);

    assert_eq!(table.claim(first, &edge), Claim::Claimed);
    assert_eq!(table.claim(first, &edge), Claim::Claimed);
    assert_eq!(table.claim(second, &edge), Claim::Duplicate { holder: first });

    let impostor =
        NodeIdentity::new(NodeId::new(66_000), Tier::Edge, LOCALHOST, "impostor").unwrap();
    assert_eq!(table.claim(third, &impostor), Claim::Collision);

    table.release(first);
    assert_eq!(table.claim(third, &impostor), Claim::Claimed);
}

#[test]
fn test_claiming_our_own_identifier_collides() {
    let table = SessionTable::new(NodeId::new(65_100));
    let id = table.register(PeerOrigin::Inbound, any_remote(), None);
    let mirror = make_identity(65_100, Tier::Regional);
    assert_eq!(table.claim(id, &mirror), Claim::Collision);
}

#[test]
fn test_table_counts_established() {
    let table = SessionTable::new(NodeId::new(65_100));
    let a = table.register(PeerOrigin::Bootstrap, any_remote(), Some(NodeId::new(65_000)));
    let b = table.register(PeerOrigin::Inbound, any_remote(), None);
    assert_eq!(table.get(a).unwrap().tier, Some(Tier::Backbone));
    table.set_state(a, SessionState::Established);
    table.set_state(b, SessionState::SessionOpen);
    assert_eq!(table.established_count(), 1);
    assert!(table.remove(b).is_some());
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn test_wait_released_resolves_once_holder_ends() {
    let table = Arc::new(SessionTable::new(NodeId::new(65_100)));
    let inbound = table.register(PeerOrigin::Inbound, any_remote(), None);
    let edge = make_identity(66_000, Tier::Edge);
    assert_eq!(table.claim(inbound, &edge), Claim::Claimed);
    assert_eq!(table.holder(edge.id()), Some(inbound));

    let waiter = {
        let table = Arc::clone(&table);
        tokio::spawn(async move { table.wait_released(NodeId::new(66_000)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    table.remove(inbound);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(table.holder(edge.id()), None);
    table.wait_released(edge.id()).await;
}

// =============================================================================
// Engine over loopback
// =============================================================================

fn make_config(id: u32, tier: Tier, secret: &str) -> EngineConfig {
    let mut config = EngineConfig::new(make_identity(id, tier), Credential::psk(secret));
    config.session_bind = "127.0.0.1:0".parse().unwrap();
    config.handshake_bind = "127.0.0.1:0".parse().unwrap();
    config.channel = ChannelConfig {
        handshake_timeout: Duration::from_millis(300),
        handshake_retries: 2,
        backoff: BackoffPolicy::fixed(Duration::from_millis(20), Duration::from_millis(50)),
        auth_cooldown_secs: 1,
        pending_ttl: Duration::from_secs(5),
    };
    config.session = SessionConfig {
        hold_time_secs: 9,
        keepalive: Duration::from_secs(1),
        rekey_interval: Duration::from_secs(3600),
        connect_timeout: Duration::from_secs(1),
        open_timeout: Duration::from_secs(2),
        claim_timeout: Duration::from_secs(2),
    };
    config.reconnect = BackoffPolicy::fixed(Duration::from_millis(50), Duration::from_millis(200));
    config
}

fn bootstrap_to(engine: &PeerEngine, expected: Option<u32>) -> BootstrapPeer {
    BootstrapPeer {
        address: LOCALHOST,
        session_port: engine.session_addr().port(),
        handshake_port: engine.handshake_addr().port(),
        expected_id: expected.map(NodeId::new),
    }
}

async fn start(config: EngineConfig) -> PeerEngine {
    PeerEngine::start(config, Arc::new(SystemTimeSource::new()))
        .await
        .unwrap()
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn has_established(engine: &PeerEngine, peer: u32) -> bool {
    engine
        .sessions()
        .iter()
        .any(|s| s.state == SessionState::Established && s.peer == Some(NodeId::new(peer)))
}

#[tokio::test]
async fn test_edge_and_regional_exchange_routes() {
    let mut regional_config = make_config(65_100, Tier::Regional, "shared");
    regional_config.originate = vec![prefix("10.100.0.0/16")];
    let regional = start(regional_config).await;

    let mut edge_config = make_config(66_000, Tier::Edge, "shared");
    edge_config.originate = vec![prefix("10.66.0.0/16")];
    edge_config.bootstrap = vec![bootstrap_to(&regional, Some(65_100))];
    let edge = start(edge_config).await;

    wait_until("edge session", || has_established(&edge, 65_100)).await;
    wait_until("regional session", || has_established(&regional, 66_000)).await;
    wait_until("edge route at regional", || {
        regional.hub().best_route(&prefix("10.66.0.0/16")).is_some()
    })
    .await;
    wait_until("regional route at edge", || {
        edge.hub().best_route(&prefix("10.100.0.0/16")).is_some()
    })
    .await;

    edge.shutdown().await;
    wait_until("withdrawal at regional", || {
        regional.hub().best_route(&prefix("10.66.0.0/16")).is_none()
    })
    .await;
    assert_eq!(regional.counters().withdraw_events, 1);
    regional.shutdown().await;
}

#[tokio::test]
async fn test_edge_to_edge_is_rejected_after_open() {
    let other = start(make_config(66_001, Tier::Edge, "shared")).await;
    let mut config = make_config(66_000, Tier::Edge, "shared");
    config.bootstrap = vec![bootstrap_to(&other, None)];
    let edge = start(config).await;

    wait_until("rejection", || {
        edge.sessions()
            .iter()
            .any(|s| s.state == SessionState::Rejected)
    })
    .await;
    assert!(edge.counters().rejected_adjacencies >= 1);
    assert!(!has_established(&other, 66_000));

    edge.shutdown().await;
    other.shutdown().await;
}

#[tokio::test]
async fn test_precheck_rejects_without_contact() {
    let mut config = make_config(66_000, Tier::Edge, "shared");
    config.bootstrap = vec![BootstrapPeer {
        address: LOCALHOST,
        session_port: 9,
        handshake_port: 9,
        expected_id: Some(NodeId::new(65_000)),
    }];
    let edge = start(config).await;

    wait_until("precheck rejection", || {
        edge.sessions()
            .iter()
            .any(|s| s.state == SessionState::Rejected)
    })
    .await;
    assert_eq!(edge.channels().stats().handshakes_initiated, 0);
    edge.shutdown().await;
}

#[tokio::test]
async fn test_mismatched_secret_never_establishes() {
    let regional = start(make_config(65_100, Tier::Regional, "right")).await;
    let mut config = make_config(66_000, Tier::Edge, "wrong");
    config.bootstrap = vec![bootstrap_to(&regional, Some(65_100))];
    let edge = start(config).await;

    wait_until("handshake failure", || edge.counters().handshake_failures >= 1).await;
    assert!(!has_established(&edge, 65_100));
    assert!(!has_established(&regional, 66_000));
    assert_eq!(edge.counters().sessions_established, 0);

    edge.shutdown().await;
    regional.shutdown().await;
}

#[tokio::test]
async fn test_service_resolves_across_session() {
    let regional = start(make_config(65_100, Tier::Regional, "shared")).await;
    let mut config = make_config(66_000, Tier::Edge, "shared");
    config.services = vec![LocalService {
        name: "chat".into(),
        fqdn: "chat.example.vx0".into(),
        port: 6667,
    }];
    config.bootstrap = vec![bootstrap_to(&regional, Some(65_100))];
    let edge = start(config).await;

    wait_until("service at regional", || {
        !matches!(regional.resolve("chat.example.vx0"), Resolution::NotFound { .. })
    })
    .await;
    match regional.resolve("chat.example.vx0") {
        Resolution::Service { port, owner, .. } => {
            assert_eq!(port, 6667);
            assert_eq!(owner, NodeId::new(66_000));
        }
        other => panic!("unexpected resolution {other:?}"),
    }
    assert!(regional.resolve("example.com").is_refused());
    assert_eq!(regional.snapshot().names.refused, 1);

    edge.shutdown().await;
    wait_until("service withdrawn", || {
        matches!(regional.resolve("chat.example.vx0"), Resolution::NotFound { .. })
    })
    .await;
    regional.shutdown().await;
}

// =============================================================================
// Hand-driven peer
// =============================================================================

/// One end of a session driven frame by frame, for peers that misbehave.
struct RawPeer {
    identity: NodeIdentity,
    channels: Arc<ChannelManager>,
    listener: TcpListener,
    _stop: watch::Sender<bool>,
}

struct RawSession {
    identity: NodeIdentity,
    channel: SecureChannel,
    stream: TcpStream,
}

impl RawPeer {
    async fn bind(id: u32, tier: Tier, secret: &str) -> Self {
        let identity = make_identity(id, tier);
        let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource::new());
        let local = LocalParams::new(identity.clone(), Credential::psk(secret))
            .with_time_source(Arc::clone(&time));
        let channel_config = make_config(id, tier, secret).channel;
        let channels = ChannelManager::bind("127.0.0.1:0".parse().unwrap(), local, channel_config, time)
            .await
            .unwrap();
        let (stop, stop_rx) = watch::channel(false);
        channels.spawn_receiver(stop_rx);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self {
            identity,
            channels,
            listener,
            _stop: stop,
        }
    }

    /// Bootstrap entry pointing at this peer. Its listener never accepts.
    fn as_bootstrap(&self) -> BootstrapPeer {
        BootstrapPeer {
            address: LOCALHOST,
            session_port: self.listener.local_addr().unwrap().port(),
            handshake_port: self.channels.local_addr().unwrap().port(),
            expected_id: Some(self.identity.id()),
        }
    }

    /// Channel handshake, connection and preamble; no Open yet.
    async fn dial(&self, engine: &PeerEngine) -> RawSession {
        let channel = self
            .channels
            .connect(engine.handshake_addr(), Some(engine.identity().id()))
            .await
            .unwrap();
        let mut stream = TcpStream::connect(engine.session_addr()).await.unwrap();
        write_preamble(&mut stream, channel.remote_spi()).await.unwrap();
        RawSession {
            identity: self.identity.clone(),
            channel,
            stream,
        }
    }
}

impl RawSession {
    async fn send_bytes(&mut self, bytes: &[u8]) {
        let frame = self.channel.seal(bytes).unwrap();
        write_frame(&mut self.stream, &frame).await.unwrap();
    }

    async fn send(&mut self, message: &SessionMessage) {
        self.send_bytes(&message.encode().unwrap()).await;
    }

    async fn open(&mut self, hold_time_secs: u16) {
        let open = Open {
            identity: self.identity.clone(),
            hold_time_secs,
            capabilities: Capabilities::default(),
        };
        self.send(&SessionMessage::Open(open)).await;
    }

    /// Skip everything until the engine sends a Notification. `None` if the
    /// connection ends first or nothing arrives for ten seconds.
    async fn next_notification(&mut self) -> Option<NotificationCode> {
        let read = async {
            loop {
                let frame = read_frame(&mut self.stream).await.ok()??;
                let plaintext = self.channel.open(&frame).ok()?;
                if let SessionMessage::Notification { code, .. } =
                    SessionMessage::decode(&plaintext).ok()?
                {
                    return Some(code);
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), read)
            .await
            .ok()
            .flatten()
    }
}

#[tokio::test]
async fn test_silent_peer_expires_and_is_withdrawn() {
    let regional = start(make_config(65_100, Tier::Regional, "shared")).await;
    let raw = RawPeer::bind(66_000, Tier::Edge, "shared").await;
    let mut session = raw.dial(&regional).await;
    session.open(MIN_HOLD_TIME_SECS).await;
    session
        .send(&SessionMessage::RouteUpdate(edge_announce(66_000, "10.66.0.0/16")))
        .await;
    wait_until("route from the raw edge", || {
        regional.hub().best_route(&prefix("10.66.0.0/16")).is_some()
    })
    .await;

    // Nothing more is sent, not even keepalives.
    assert_eq!(
        session.next_notification().await,
        Some(NotificationCode::HoldTimerExpired)
    );
    wait_until("withdrawal after hold expiry", || {
        regional.hub().best_route(&prefix("10.66.0.0/16")).is_none()
    })
    .await;
    assert!(!has_established(&regional, 66_000));
    assert_eq!(regional.counters().withdraw_events, 1);
    assert_eq!(regional.counters().protocol_errors, 0);
    regional.shutdown().await;
}

#[tokio::test]
async fn test_invalid_route_update_closes_only_that_session() {
    let regional = start(make_config(65_100, Tier::Regional, "shared")).await;
    let mut edge_config = make_config(66_001, Tier::Edge, "shared");
    edge_config.originate = vec![prefix("10.67.0.0/16")];
    edge_config.bootstrap = vec![bootstrap_to(&regional, Some(65_100))];
    let edge = start(edge_config).await;
    wait_until("well-behaved edge route", || {
        regional.hub().best_route(&prefix("10.67.0.0/16")).is_some()
    })
    .await;

    let raw = RawPeer::bind(66_000, Tier::Edge, "shared").await;
    let mut session = raw.dial(&regional).await;
    session.open(9).await;
    session
        .send(&SessionMessage::RouteUpdate(edge_announce(66_000, "10.66.0.0/16")))
        .await;
    wait_until("route from the raw edge", || {
        regional.hub().best_route(&prefix("10.66.0.0/16")).is_some()
    })
    .await;

    // Empty path: the entry claims to come from nobody.
    let bad = RouteDelta {
        announce: vec![RouteEntry::local(prefix("10.68.0.0/16"), NodeId::new(66_000))],
        withdraw: Vec::new(),
    };
    session.send(&SessionMessage::RouteUpdate(bad)).await;
    assert_eq!(
        session.next_notification().await,
        Some(NotificationCode::ProtocolError)
    );
    wait_until("raw edge routes withdrawn", || {
        regional.hub().best_route(&prefix("10.66.0.0/16")).is_none()
    })
    .await;

    assert!(regional.hub().best_route(&prefix("10.68.0.0/16")).is_none());
    assert_eq!(regional.counters().protocol_errors, 1);
    assert!(has_established(&regional, 66_001));
    assert!(regional.hub().best_route(&prefix("10.67.0.0/16")).is_some());

    edge.shutdown().await;
    regional.shutdown().await;
}

#[tokio::test]
async fn test_invalid_service_update_closes_session() {
    let regional = start(make_config(65_100, Tier::Regional, "shared")).await;
    let raw = RawPeer::bind(66_000, Tier::Edge, "shared").await;
    let mut session = raw.dial(&regional).await;
    session.open(9).await;
    session
        .send(&SessionMessage::ServiceUpdate(ServiceDelta {
            announce: vec![make_service(66_000, "chat.example.vx0", 6667)],
            withdraw: Vec::new(),
        }))
        .await;
    wait_until("service from the raw edge", || {
        regional.hub().lookup("chat.example.vx0").is_some()
    })
    .await;

    let mut bad = make_service(66_000, "ok.vx0", 80);
    bad.fqdn = "evil.example.com".into();
    session
        .send(&SessionMessage::ServiceUpdate(ServiceDelta {
            announce: vec![bad],
            withdraw: Vec::new(),
        }))
        .await;
    assert_eq!(
        session.next_notification().await,
        Some(NotificationCode::ProtocolError)
    );
    wait_until("service withdrawn", || {
        regional.hub().lookup("chat.example.vx0").is_none()
    })
    .await;
    assert_eq!(regional.counters().protocol_errors, 1);
    regional.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_message_closes_session() {
    let regional = start(make_config(65_100, Tier::Regional, "shared")).await;
    let raw = RawPeer::bind(66_000, Tier::Edge, "shared").await;
    let mut session = raw.dial(&regional).await;
    session.open(9).await;
    wait_until("raw edge established", || has_established(&regional, 66_000)).await;

    session.send_bytes(&[0xff; 24]).await;
    assert_eq!(
        session.next_notification().await,
        Some(NotificationCode::ProtocolError)
    );
    wait_until("session gone", || !has_established(&regional, 66_000)).await;
    assert_eq!(regional.counters().protocol_errors, 1);
    regional.shutdown().await;
}

#[tokio::test]
async fn test_inbound_beyond_capacity_is_refused() {
    let edge = start(make_config(66_000, Tier::Edge, "shared")).await;
    let max = Tier::Edge.max_peers() as u32;

    let mut held = Vec::new();
    for id in 65_100..65_100 + max {
        let raw = RawPeer::bind(id, Tier::Regional, "shared").await;
        let mut session = raw.dial(&edge).await;
        session.open(30).await;
        wait_until("regional established", || has_established(&edge, id)).await;
        held.push((raw, session));
    }

    let extra = RawPeer::bind(65_100 + max, Tier::Regional, "shared").await;
    let mut session = extra.dial(&edge).await;
    session.open(30).await;
    assert_eq!(
        session.next_notification().await,
        Some(NotificationCode::ResourceExhausted)
    );
    assert_eq!(edge.counters().capacity_refusals, 1);
    assert!(!has_established(&edge, 65_100 + max));
    let established = edge
        .sessions()
        .iter()
        .filter(|s| s.state == SessionState::Established)
        .count();
    assert_eq!(established, max as usize);

    edge.shutdown().await;
    drop(held);
}

#[tokio::test]
async fn test_bootstrap_waits_while_peer_holds_inbound_session() {
    let raw = RawPeer::bind(66_000, Tier::Edge, "shared").await;
    let mut config = make_config(65_100, Tier::Regional, "shared");
    config.bootstrap = vec![raw.as_bootstrap()];
    let regional = start(config).await;

    let mut session = raw.dial(&regional).await;
    session.open(30).await;
    wait_until("inbound session from the edge", || {
        has_established(&regional, 66_000)
    })
    .await;
    // The outbound attempt never gets an Open back and times out.
    wait_until("bootstrap attempt finished", || {
        regional
            .sessions()
            .iter()
            .any(|s| s.origin == PeerOrigin::Bootstrap && s.last_error.is_some())
    })
    .await;

    let attempts = regional.channels().stats().handshakes_initiated;
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(regional.channels().stats().handshakes_initiated, attempts);

    drop(session);
    wait_until("bootstrap resumed", || {
        regional.channels().stats().handshakes_initiated > attempts
    })
    .await;
    regional.shutdown().await;
}
