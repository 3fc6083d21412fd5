//! Routing hub: the one owner of the route table and service registry.
//!
//! Sessions never touch the tables directly. Every call below is a single
//! critical section that applies the change, reconciles each attached
//! session's advertised sets and pushes the resulting deltas into that
//! session's outbox. Nothing in here awaits.

use crate::domain::SessionMessage;
use crate::error::{SessionError, SessionResult};
use parking_lot::Mutex;
use serde::Serialize;
use shared_types::TimeSource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use vx_01_tier_identity::{NodeId, NodeIdentity, Tier};
use vx_03_route_table::{
    AdvertisedSet, ExportPolicy, IpNet, MergeOutcome, RouteDelta, RouteEntry, RouteTable,
    RouteTableStats, SelectedRoute, SelectionPolicy,
};
use vx_04_service_registry::{
    AnnounceOutcome, RegistryResult, RegistryStats, ServiceAdvertisedSet, ServiceDelta,
    ServiceRecord, ServiceRegistry, StoredRecord,
};
use vx_05_name_gate::ServiceLookup;

/// Sender half of a session's outbox.
pub type Outbox = mpsc::UnboundedSender<SessionMessage>;

struct Attached {
    tier: Tier,
    routes: AdvertisedSet,
    services: ServiceAdvertisedSet,
    outbox: Outbox,
}

struct HubState {
    routes: RouteTable,
    services: ServiceRegistry,
    export: ExportPolicy,
    sessions: HashMap<NodeId, Attached>,
}

/// What a detach removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetachReport {
    pub routes_withdrawn: usize,
    pub services_withdrawn: usize,
}

/// Per attached session counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttachedSummary {
    pub peer: NodeId,
    pub tier: Tier,
    pub routes_received: usize,
    pub routes_advertised: usize,
    pub services_advertised: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubSnapshot {
    pub routes: Vec<SelectedRoute>,
    pub services: Vec<StoredRecord>,
    pub attached: Vec<AttachedSummary>,
    pub route_stats: RouteTableStats,
    pub registry_stats: RegistryStats,
    pub withdraw_events: u64,
}

pub struct RoutingHub {
    local: NodeIdentity,
    state: Mutex<HubState>,
    time: Arc<dyn TimeSource>,
    withdraw_events: AtomicU64,
}

impl RoutingHub {
    pub fn new(
        local: NodeIdentity,
        selection: SelectionPolicy,
        export: ExportPolicy,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let state = HubState {
            routes: RouteTable::new(local.id(), selection),
            services: ServiceRegistry::new(local.id()),
            export,
            sessions: HashMap::new(),
        };
        Self {
            local,
            state: Mutex::new(state),
            time,
            withdraw_events: AtomicU64::new(0),
        }
    }

    pub fn local(&self) -> &NodeIdentity {
        &self.local
    }

    // =========================================================================
    // Session attachment
    // =========================================================================

    /// Attach an established session and queue its initial sync burst.
    pub fn attach(&self, peer: &NodeIdentity, outbox: Outbox) -> SessionResult<()> {
        let mut state = self.state.lock();
        if state.sessions.contains_key(&peer.id()) {
            return Err(SessionError::DuplicateSession { id: peer.id() });
        }
        let mut attached = Attached {
            tier: peer.tier(),
            routes: AdvertisedSet::new(peer.id(), peer.tier()),
            services: ServiceAdvertisedSet::new(self.local.tier(), peer.id(), peer.tier()),
            outbox,
        };
        let routes = attached.routes.full_sync(&state.routes, &state.export);
        let services = attached.services.full_sync(&state.services);
        debug!(
            "[vx-06] Initial sync to {}: {} routes, {} services",
            peer.id(),
            routes.announce.len(),
            services.announce.len()
        );
        push(&attached.outbox, routes, services);
        state.sessions.insert(peer.id(), attached);
        Ok(())
    }

    /// Remove everything `peer` contributed and withdraw it from every other
    /// session. Only the first call for a given attachment does anything.
    pub fn detach(&self, peer: NodeId) -> Option<DetachReport> {
        let mut state = self.state.lock();
        state.sessions.remove(&peer)?;
        let routes = state.routes.drop_peer(peer);
        let services = state.services.drop_peer(peer);
        let report = DetachReport {
            routes_withdrawn: routes.changed.len(),
            services_withdrawn: services
                .iter()
                .filter(|fqdn| state.services.get(fqdn).is_none())
                .count(),
        };
        if report.routes_withdrawn + report.services_withdrawn > 0 {
            self.withdraw_events.fetch_add(1, Ordering::Relaxed);
        }
        fan_out(&mut state, &routes, &services);
        info!(
            "[vx-06] Detached {}: withdrew {} routes, {} services",
            peer, report.routes_withdrawn, report.services_withdrawn
        );
        Some(report)
    }

    pub fn is_attached(&self, peer: NodeId) -> bool {
        self.state.lock().sessions.contains_key(&peer)
    }

    // =========================================================================
    // Updates from sessions
    // =========================================================================

    pub fn apply_route_update(&self, peer: NodeId, delta: RouteDelta) -> SessionResult<()> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&peer) {
            return Err(SessionError::protocol(format!(
                "route update from unattached peer {peer}"
            )));
        }
        let HubState { routes, export, .. } = &mut *state;
        let mut outcome = routes.import(peer, delta.announce, export)?;
        outcome.extend(routes.withdraw(peer, &delta.withdraw));
        fan_out(&mut state, &outcome, &[]);
        Ok(())
    }

    pub fn apply_service_update(&self, peer: NodeId, delta: ServiceDelta) -> SessionResult<()> {
        let now = self.time.now();
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&peer) {
            return Err(SessionError::protocol(format!(
                "service update from unattached peer {peer}"
            )));
        }
        for record in &delta.announce {
            record.validate()?;
        }
        let mut changed = Vec::with_capacity(delta.announce.len() + delta.withdraw.len());
        for record in delta.announce {
            let fqdn = record.fqdn.clone();
            if state.services.apply_announce(peer, record, now)? != AnnounceOutcome::Ignored {
                changed.push(fqdn);
            }
        }
        for fqdn in delta.withdraw {
            let carried = state
                .services
                .get(&fqdn)
                .is_some_and(|stored| stored.is_carried_by(peer));
            if carried {
                state.services.apply_withdraw(peer, &fqdn);
                changed.push(fqdn);
            }
        }
        fan_out(&mut state, &MergeOutcome::default(), &changed);
        Ok(())
    }

    // =========================================================================
    // Local changes
    // =========================================================================

    /// Originate a prefix from this node.
    pub fn originate(&self, prefix: IpNet) {
        let mut state = self.state.lock();
        let outcome = state
            .routes
            .originate(RouteEntry::local(prefix, self.local.id()));
        fan_out(&mut state, &outcome, &[]);
    }

    pub fn retract(&self, prefix: &IpNet) {
        let mut state = self.state.lock();
        let outcome = state.routes.retract(prefix);
        fan_out(&mut state, &outcome, &[]);
    }

    /// Register a service hosted on this node.
    pub fn register_service(&self, record: ServiceRecord) -> RegistryResult<AnnounceOutcome> {
        let now = self.time.now();
        let mut state = self.state.lock();
        let fqdn = record.fqdn.clone();
        let outcome = state.services.register_local(record, now)?;
        fan_out(&mut state, &MergeOutcome::default(), &[fqdn]);
        Ok(outcome)
    }

    pub fn unregister_service(&self, fqdn: &str) -> RegistryResult<ServiceRecord> {
        let mut state = self.state.lock();
        let record = state.services.unregister_local(fqdn)?;
        fan_out(&mut state, &MergeOutcome::default(), &[record.fqdn.clone()]);
        Ok(record)
    }

    /// Extend every local record's expiry and forward the refresh.
    pub fn refresh_local(&self) -> usize {
        let now = self.time.now();
        let mut state = self.state.lock();
        let refreshed = state.services.refresh_all_local(now);
        fan_out(&mut state, &MergeOutcome::default(), &refreshed);
        refreshed.len()
    }

    /// Drop records past their TTL and withdraw them downstream.
    pub fn expire_services(&self) -> usize {
        let now = self.time.now();
        let mut state = self.state.lock();
        let expired = state.services.expire(now);
        fan_out(&mut state, &MergeOutcome::default(), &expired);
        expired.len()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn lookup(&self, fqdn: &str) -> Option<ServiceRecord> {
        let now = self.time.now();
        self.state.lock().services.lookup(fqdn, now).cloned()
    }

    pub fn best_route(&self, prefix: &IpNet) -> Option<SelectedRoute> {
        self.state.lock().routes.best(prefix).cloned()
    }

    pub fn route_count(&self) -> usize {
        self.state.lock().routes.len()
    }

    pub fn withdraw_events(&self) -> u64 {
        self.withdraw_events.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HubSnapshot {
        let state = self.state.lock();
        let mut attached: Vec<AttachedSummary> = state
            .sessions
            .iter()
            .map(|(peer, session)| AttachedSummary {
                peer: *peer,
                tier: session.tier,
                routes_received: state.routes.received_count(*peer),
                routes_advertised: session.routes.len(),
                services_advertised: session.services.len(),
            })
            .collect();
        attached.sort_by_key(|summary| summary.peer);
        HubSnapshot {
            routes: state.routes.routes().cloned().collect(),
            services: state.services.records().cloned().collect(),
            attached,
            route_stats: state.routes.stats(),
            registry_stats: state.services.stats(),
            withdraw_events: self.withdraw_events(),
        }
    }
}

impl std::fmt::Debug for RoutingHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingHub")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

/// Service view of a shared hub, for the name gate.
#[derive(Debug, Clone)]
pub struct HubServices(pub Arc<RoutingHub>);

impl ServiceLookup for HubServices {
    fn lookup_service(&self, fqdn: &str) -> Option<ServiceRecord> {
        self.0.lookup(fqdn)
    }
}

fn fan_out(state: &mut HubState, routes: &MergeOutcome, services: &[String]) {
    if routes.is_empty() && services.is_empty() {
        return;
    }
    let prefixes: Vec<IpNet> = routes.changed.iter().copied().collect();
    let HubState {
        routes: table,
        services: registry,
        export,
        sessions,
    } = state;
    for session in sessions.values_mut() {
        let route_delta = if prefixes.is_empty() {
            RouteDelta::default()
        } else {
            session.routes.reconcile(table, export, &prefixes)
        };
        let service_delta = if services.is_empty() {
            ServiceDelta::default()
        } else {
            session.services.reconcile(registry, services)
        };
        push(&session.outbox, route_delta, service_delta);
    }
}

/// Queue non-empty deltas. A closed outbox means the session is already
/// tearing down and will detach itself.
fn push(outbox: &Outbox, routes: RouteDelta, services: ServiceDelta) {
    if !routes.is_empty() {
        let _ = outbox.send(SessionMessage::RouteUpdate(routes));
    }
    if !services.is_empty() {
        let _ = outbox.send(SessionMessage::ServiceUpdate(services));
    }
}
