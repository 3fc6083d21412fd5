//! Node runtime: owns the peer engine and a periodic status reporter.

use anyhow::{Context, Result};
use shared_types::{SystemTimeSource, TimeSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vx_06_peer_session::{EngineConfig, EngineSnapshot, PeerEngine};

/// How often the status line is logged.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(60);

pub struct NodeRuntime {
    engine: Arc<PeerEngine>,
    shutdown_tx: watch::Sender<bool>,
    reporter: JoinHandle<()>,
}

impl NodeRuntime {
    /// Start the engine on the system clock.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        Self::start_with_clock(config, Arc::new(SystemTimeSource::new()), STATUS_INTERVAL).await
    }

    pub async fn start_with_clock(
        config: EngineConfig,
        time: Arc<dyn TimeSource>,
        status_every: Duration,
    ) -> Result<Self> {
        let identity = config.identity.clone();
        let engine = PeerEngine::start(config, time)
            .await
            .with_context(|| format!("starting peer engine for {identity}"))?;
        let engine = Arc::new(engine);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reporter = tokio::spawn(report_status(
            Arc::clone(&engine),
            status_every,
            shutdown_rx,
        ));

        Ok(Self {
            engine,
            shutdown_tx,
            reporter,
        })
    }

    pub fn engine(&self) -> &Arc<PeerEngine> {
        &self.engine
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.engine.snapshot()
    }

    /// Shutdown the node gracefully: stop the reporter, close every session
    /// and log the final counters.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown...");
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.reporter.await {
            warn!("Status reporter ended abnormally: {}", e);
        }
        self.engine.shutdown().await;
        log_status(&self.engine.snapshot());
        info!("Shutdown complete");
    }
}

async fn report_status(
    engine: Arc<PeerEngine>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => log_status(&engine.snapshot()),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// One summary line per call.
pub fn log_status(snapshot: &EngineSnapshot) {
    let established = snapshot
        .sessions
        .iter()
        .filter(|s| s.state == vx_06_peer_session::SessionState::Established)
        .count();
    let c = &snapshot.counters;
    info!(
        node = %snapshot.identity,
        sessions = snapshot.sessions.len(),
        established,
        routes = snapshot.hub.routes.len(),
        services = snapshot.hub.services.len(),
        handshake_failures = c.handshake_failures,
        rejected_adjacencies = c.rejected_adjacencies,
        identity_collisions = c.identity_collisions,
        protocol_errors = c.protocol_errors,
        withdraw_events = c.withdraw_events,
        refused_names = snapshot.names.refused,
        "Node status"
    );
}
