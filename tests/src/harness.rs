//! Fixtures shared by the integration scenarios.

use shared_crypto::Ed25519KeyPair;
use shared_types::{BackoffPolicy, SystemTimeSource, Timestamp};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use vx_01_tier_identity::{NodeId, NodeIdentity, Tier};
use vx_02_secure_channel::{CertificateCredential, ChannelConfig, Credential, NodeCertificate};
use vx_03_route_table::IpNet;
use vx_06_peer_session::{
    BootstrapPeer, EngineConfig, LocalService, PeerEngine, SessionConfig, SessionInfo,
    SessionState,
};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const SHARED_SECRET: &str = "vx0-integration-secret";

/// Upper bound for any single wait in a scenario.
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(15);

pub fn make_identity(id: u32, tier: Tier) -> NodeIdentity {
    NodeIdentity::new(NodeId::new(id), tier, LOCALHOST, format!("node-{id}.vx0")).unwrap()
}

pub fn prefix(s: &str) -> IpNet {
    s.parse().unwrap()
}

/// Engine configuration on ephemeral loopback ports with timers short
/// enough for tests.
pub fn make_config(id: u32, tier: Tier, credential: Credential) -> EngineConfig {
    let mut config = EngineConfig::new(make_identity(id, tier), credential);
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
    config.expiry_sweep = Duration::from_millis(200);
    config
}

pub fn make_psk_config(id: u32, tier: Tier) -> EngineConfig {
    make_config(id, tier, Credential::psk(SHARED_SECRET))
}

pub fn make_service(name: &str, fqdn: &str, port: u16) -> LocalService {
    LocalService {
        name: name.into(),
        fqdn: fqdn.into(),
        port,
    }
}

/// A trust root able to issue node certificates.
pub struct TestAuthority {
    root: Ed25519KeyPair,
}

impl TestAuthority {
    pub fn new(seed: u8) -> Self {
        Self {
            root: Ed25519KeyPair::from_seed([seed; 32]),
        }
    }

    /// Certificate credential for `identity`, valid until 2100.
    pub fn credential(&self, identity: &NodeIdentity, key_seed: u8) -> Credential {
        let key = Ed25519KeyPair::from_seed([key_seed; 32]);
        let certificate = NodeCertificate::issue(
            &self.root,
            "vx0-test-root",
            identity,
            key.public_key(),
            Timestamp::new(4_102_444_800),
        );
        let credential =
            CertificateCredential::new(certificate, key, self.root.public_key()).unwrap();
        Credential::Certificate(Arc::new(credential))
    }
}

pub fn bootstrap_to(engine: &PeerEngine, expected: Option<u32>) -> BootstrapPeer {
    BootstrapPeer {
        address: LOCALHOST,
        session_port: engine.session_addr().port(),
        handshake_port: engine.handshake_addr().port(),
        expected_id: expected.map(NodeId::new),
    }
}

pub async fn start(config: EngineConfig) -> PeerEngine {
    PeerEngine::start(config, Arc::new(SystemTimeSource::new()))
        .await
        .unwrap()
}

/// Poll `check` until it holds, failing the test after [`SCENARIO_TIMEOUT`].
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + SCENARIO_TIMEOUT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn session_with(engine: &PeerEngine, peer: u32) -> Option<SessionInfo> {
    engine
        .sessions()
        .into_iter()
        .find(|s| s.peer == Some(NodeId::new(peer)))
}

pub fn has_established(engine: &PeerEngine, peer: u32) -> bool {
    engine
        .sessions()
        .iter()
        .any(|s| s.state == SessionState::Established && s.peer == Some(NodeId::new(peer)))
}

pub fn has_route(engine: &PeerEngine, net: &str) -> bool {
    engine.hub().best_route(&prefix(net)).is_some()
}
