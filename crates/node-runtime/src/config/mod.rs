//! # Node Configuration
//!
//! A node is described by one TOML file. Every section except `[node]` and
//! `[credential]` may be omitted; missing values take the defaults below.
//!
//! ```toml
//! [node]
//! hostname = "edge-1.vx0"
//! id = 66001
//! tier = "edge"
//! address = "192.0.2.10"
//!
//! [credential]
//! psk = "..."
//!
//! [[bootstrap]]
//! address = "192.0.2.1"
//! id = 65100
//! ```
//!
//! Selected values can be overridden with `VX0_*` environment variables,
//! see [`NodeConfig::apply_overrides`].

mod credential;

pub use credential::{load_certificate_credential, CredentialConfig};

use serde::Deserialize;
use shared_types::BackoffPolicy;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use vx_01_tier_identity::{IdentifierAllocator, NodeId, NodeIdentity, Tier};
use vx_02_secure_channel::ChannelConfig;
use vx_03_route_table::{Criterion, ExportPolicy, IpNet, SelectionPolicy};
use vx_05_name_gate::ReservedNames;
use vx_06_peer_session::{
    BootstrapPeer, EngineConfig, LocalService, SessionConfig, DEFAULT_HANDSHAKE_PORT,
    DEFAULT_SESSION_PORT, MIN_HOLD_TIME_SECS,
};

/// Configuration errors. Any of these stops the node at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be read
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A value is present but unusable
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// The credential material is missing, malformed or inconsistent
    #[error("credential: {reason}")]
    Credential { reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl ToString) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete node configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timers: TimerConfig,
    pub credential: CredentialConfig,
    #[serde(default)]
    pub bootstrap: Vec<BootstrapConfig>,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    /// Directory relative credential paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// Who this node is.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    pub hostname: String,
    /// Identifier within the tier's range; the lowest one not taken by a
    /// bootstrap peer when omitted.
    #[serde(default)]
    pub id: Option<u32>,
    pub tier: Tier,
    pub address: IpAddr,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Address both listeners bind to.
    pub bind_address: IpAddr,
    /// Reachability-exchange TCP port.
    pub session_port: u16,
    /// Channel handshake UDP port.
    pub handshake_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            session_port: DEFAULT_SESSION_PORT,
            handshake_port: DEFAULT_HANDSHAKE_PORT,
        }
    }
}

/// Session and channel timers, all in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimerConfig {
    pub hold_time_secs: u16,
    pub keepalive_secs: u64,
    pub handshake_timeout_secs: u64,
    pub handshake_retries: u32,
    /// Reconnection backoff towards bootstrap peers.
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
    pub auth_cooldown_secs: u64,
    /// Zero disables periodic rekeying.
    pub rekey_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub open_timeout_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            hold_time_secs: 90,
            keepalive_secs: 30,
            handshake_timeout_secs: 5,
            handshake_retries: 5,
            backoff_initial_secs: 1,
            backoff_max_secs: 300,
            auth_cooldown_secs: 600,
            rekey_interval_secs: 3600,
            connect_timeout_secs: 10,
            open_timeout_secs: 30,
        }
    }
}

/// One entry of the bootstrap list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    pub address: IpAddr,
    /// Expected identifier. Lets the adjacency check run before dialing.
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub session_port: Option<u16>,
    #[serde(default)]
    pub handshake_port: Option<u16>,
}

/// Locally hosted services and record lifetimes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServicesConfig {
    pub ttl_secs: u32,
    pub refresh_secs: u64,
    pub expiry_sweep_secs: u64,
    pub local: Vec<LocalServiceConfig>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            refresh_secs: 120,
            expiry_sweep_secs: 10,
            local: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalServiceConfig {
    pub name: String,
    pub fqdn: String,
    pub port: u16,
}

/// Originated prefixes and route policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutesConfig {
    pub originate: Vec<IpNet>,
    /// Prefixes Edge sessions may receive besides locally originated ones.
    pub aggregates: Vec<IpNet>,
    /// Tie-break order between loop rejection and the identifier comparison.
    pub tie_break: Vec<Criterion>,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            originate: Vec::new(),
            aggregates: ExportPolicy::default().aggregates,
            tie_break: SelectionPolicy::default().order,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DnsConfig {
    /// Extra reserved names, added to the built-in infrastructure names.
    pub reserved: BTreeMap<String, IpAddr>,
}

impl NodeConfig {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: NodeConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> ConfigResult<Vec<&'static str>> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `VX0_*` overrides looked up through `lookup`. Returns the
    /// variables that were applied.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `VX0_NODE_ID` | `node.id` |
    /// | `VX0_NODE_TIER` | `node.tier` |
    /// | `VX0_NODE_ADDRESS` | `node.address` |
    /// | `VX0_NODE_HOSTNAME` | `node.hostname` |
    /// | `VX0_SESSION_PORT` | `network.session_port` |
    /// | `VX0_HANDSHAKE_PORT` | `network.handshake_port` |
    /// | `VX0_PSK` | `credential.psk` (clears certificate paths) |
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<Vec<&'static str>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(value) = lookup("VX0_NODE_ID") {
            self.node.id = Some(parse_override("VX0_NODE_ID", &value)?);
            applied.push("VX0_NODE_ID");
        }
        if let Some(value) = lookup("VX0_NODE_TIER") {
            self.node.tier = parse_override("VX0_NODE_TIER", &value)?;
            applied.push("VX0_NODE_TIER");
        }
        if let Some(value) = lookup("VX0_NODE_ADDRESS") {
            self.node.address = parse_override("VX0_NODE_ADDRESS", &value)?;
            applied.push("VX0_NODE_ADDRESS");
        }
        if let Some(value) = lookup("VX0_NODE_HOSTNAME") {
            self.node.hostname = value;
            applied.push("VX0_NODE_HOSTNAME");
        }
        if let Some(value) = lookup("VX0_SESSION_PORT") {
            self.network.session_port = parse_override("VX0_SESSION_PORT", &value)?;
            applied.push("VX0_SESSION_PORT");
        }
        if let Some(value) = lookup("VX0_HANDSHAKE_PORT") {
            self.network.handshake_port = parse_override("VX0_HANDSHAKE_PORT", &value)?;
            applied.push("VX0_HANDSHAKE_PORT");
        }
        if let Some(value) = lookup("VX0_PSK") {
            self.credential = CredentialConfig {
                psk: Some(value),
                ..CredentialConfig::default()
            };
            applied.push("VX0_PSK");
        }

        Ok(applied)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        let t = &self.timers;
        if t.hold_time_secs < MIN_HOLD_TIME_SECS {
            return Err(ConfigError::invalid(
                "timers.hold_time_secs",
                format!("must be at least {MIN_HOLD_TIME_SECS}"),
            ));
        }
        if t.keepalive_secs == 0 {
            return Err(ConfigError::invalid("timers.keepalive_secs", "must be positive"));
        }
        if t.handshake_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "timers.handshake_timeout_secs",
                "must be positive",
            ));
        }
        if t.backoff_initial_secs == 0 || t.backoff_initial_secs > t.backoff_max_secs {
            return Err(ConfigError::invalid(
                "timers.backoff_initial_secs",
                "must be positive and not above backoff_max_secs",
            ));
        }

        let s = &self.services;
        if s.ttl_secs == 0 {
            return Err(ConfigError::invalid("services.ttl_secs", "must be positive"));
        }
        if s.refresh_secs == 0 || s.refresh_secs >= u64::from(s.ttl_secs) {
            return Err(ConfigError::invalid(
                "services.refresh_secs",
                "must be positive and below ttl_secs",
            ));
        }
        if s.expiry_sweep_secs == 0 {
            return Err(ConfigError::invalid(
                "services.expiry_sweep_secs",
                "must be positive",
            ));
        }

        for (index, peer) in self.bootstrap.iter().enumerate() {
            if peer.id.is_some() && peer.id == self.node.id {
                return Err(ConfigError::invalid(
                    format!("bootstrap[{index}].id"),
                    "is this node's own identifier",
                ));
            }
        }

        self.credential.check_shape()
    }

    /// Build this node's identity. The identifier goes through an
    /// [`IdentifierAllocator`] that has seen every bootstrap peer's
    /// identifier, so a configured id is range-checked and an omitted one is
    /// picked clear of the known peers.
    pub fn identity(&self) -> ConfigResult<NodeIdentity> {
        let mut allocator = IdentifierAllocator::new();
        for (index, peer) in self.bootstrap.iter().enumerate() {
            if let Some(raw) = peer.id {
                allocator
                    .observe(NodeId::new(raw))
                    .map_err(|e| ConfigError::invalid(format!("bootstrap[{index}].id"), e))?;
            }
        }
        let id = allocator
            .allocate(self.node.tier, self.node.id)
            .map_err(|e| ConfigError::invalid("node.id", e))?;
        if self.node.id.is_none() {
            info!("Allocated identifier {} for tier {}", id, self.node.tier);
        }

        NodeIdentity::new(
            id,
            self.node.tier,
            self.node.address,
            self.node.hostname.clone(),
        )
        .map_err(|e| ConfigError::invalid("node", e))
    }

    pub fn bootstrap_peers(&self) -> Vec<BootstrapPeer> {
        self.bootstrap
            .iter()
            .map(|peer| BootstrapPeer {
                address: peer.address,
                session_port: peer.session_port.unwrap_or(DEFAULT_SESSION_PORT),
                handshake_port: peer.handshake_port.unwrap_or(DEFAULT_HANDSHAKE_PORT),
                expected_id: peer.id.map(NodeId::new),
            })
            .collect()
    }

    pub fn session_config(&self) -> SessionConfig {
        let t = &self.timers;
        SessionConfig {
            hold_time_secs: t.hold_time_secs,
            keepalive: Duration::from_secs(t.keepalive_secs),
            rekey_interval: Duration::from_secs(t.rekey_interval_secs),
            connect_timeout: Duration::from_secs(t.connect_timeout_secs),
            open_timeout: Duration::from_secs(t.open_timeout_secs),
            ..SessionConfig::default()
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        let t = &self.timers;
        ChannelConfig {
            handshake_timeout: Duration::from_secs(t.handshake_timeout_secs),
            handshake_retries: t.handshake_retries,
            auth_cooldown_secs: t.auth_cooldown_secs,
            ..ChannelConfig::default()
        }
    }

    pub fn reconnect_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(self.timers.backoff_initial_secs),
            max: Duration::from_secs(self.timers.backoff_max_secs),
            jitter: true,
        }
    }

    pub fn reserved_names(&self) -> ConfigResult<ReservedNames> {
        let mut names = ReservedNames::default();
        for (name, address) in &self.dns.reserved {
            names
                .insert(name, *address)
                .map_err(|e| ConfigError::invalid(format!("dns.reserved.{name}"), e))?;
        }
        Ok(names)
    }

    /// Validate and turn the file into everything the engine needs,
    /// loading certificate material from disk if configured.
    pub fn into_engine_config(self) -> ConfigResult<EngineConfig> {
        self.validate()?;
        let identity = self.identity()?;
        let credential = self.credential.load(&identity, self.base_dir.as_deref())?;

        let mut engine = EngineConfig::new(identity, credential);
        engine.session_bind = SocketAddr::new(self.network.bind_address, self.network.session_port);
        engine.handshake_bind =
            SocketAddr::new(self.network.bind_address, self.network.handshake_port);
        engine.bootstrap = self.bootstrap_peers();
        engine.session = self.session_config();
        engine.channel = self.channel_config();
        engine.reconnect = self.reconnect_policy();
        engine.export = ExportPolicy::new(self.routes.aggregates.clone());
        engine.selection = SelectionPolicy {
            order: self.routes.tie_break.clone(),
        };
        engine.originate = self.routes.originate.clone();
        engine.services = self
            .services
            .local
            .iter()
            .map(|s| LocalService {
                name: s.name.clone(),
                fqdn: s.fqdn.clone(),
                port: s.port,
            })
            .collect();
        engine.service_ttl_secs = self.services.ttl_secs;
        engine.service_refresh = Duration::from_secs(self.services.refresh_secs);
        engine.expiry_sweep = Duration::from_secs(self.services.expiry_sweep_secs);
        engine.reserved = self.reserved_names()?;
        Ok(engine)
    }
}

fn parse_override<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, e))
}
