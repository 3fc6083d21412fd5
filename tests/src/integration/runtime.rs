//! # Configured Nodes
//!
//! Nodes built the way the `vx0-node` binary builds them: TOML text through
//! `NodeConfig` into a running `NodeRuntime`.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use node_runtime::{NodeConfig, NodeRuntime};
    use shared_types::SystemTimeSource;
    use std::sync::Arc;
    use std::time::Duration;
    use vx_05_name_gate::Resolution;

    fn regional_toml() -> String {
        r#"
[node]
hostname = "regional-1.vx0"
id = 65100
tier = "regional"
address = "127.0.0.1"

[network]
bind_address = "127.0.0.1"
session_port = 0
handshake_port = 0

[timers]
hold_time_secs = 9
keepalive_secs = 1
handshake_timeout_secs = 1

[credential]
psk = "configured-secret"

[routes]
originate = ["10.100.0.0/16"]
"#
        .to_string()
    }

    fn edge_toml(session_port: u16, handshake_port: u16) -> String {
        format!(
            r#"
[node]
hostname = "edge-1.vx0"
id = 66001
tier = "edge"
address = "127.0.0.1"

[network]
bind_address = "127.0.0.1"
session_port = 0
handshake_port = 0

[timers]
hold_time_secs = 9
keepalive_secs = 1
handshake_timeout_secs = 1

[credential]
psk = "configured-secret"

[[bootstrap]]
address = "127.0.0.1"
id = 65100
session_port = {session_port}
handshake_port = {handshake_port}

[services]
ttl_secs = 60
refresh_secs = 20

[[services.local]]
name = "chat"
fqdn = "chat.example.vx0"
port = 6667

[routes]
originate = ["10.66.1.0/24"]

[dns.reserved]
"mirror.vx0" = "10.0.0.9"
"#
        )
    }

    async fn start_from(text: &str) -> NodeRuntime {
        let config: NodeConfig = toml::from_str(text).unwrap();
        let engine_config = config.into_engine_config().unwrap();
        NodeRuntime::start_with_clock(
            engine_config,
            Arc::new(SystemTimeSource::new()),
            Duration::from_millis(200),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_configured_nodes_peer_and_share_services() {
        let regional = start_from(&regional_toml()).await;
        let session_port = regional.engine().session_addr().port();
        let handshake_port = regional.engine().handshake_addr().port();
        let edge = start_from(&edge_toml(session_port, handshake_port)).await;

        wait_until("edge established", || {
            has_established(regional.engine(), 66_001)
        })
        .await;
        wait_until("edge route", || has_route(regional.engine(), "10.66.1.0/24")).await;
        wait_until("regional route", || has_route(edge.engine(), "10.100.0.0/16")).await;
        wait_until("service", || {
            matches!(
                regional.engine().resolve("chat.example.vx0"),
                Resolution::Service { port: 6667, .. }
            )
        })
        .await;
        assert!(matches!(
            edge.engine().resolve("mirror.vx0"),
            Resolution::Reserved { .. }
        ));

        // The management snapshot is plain serde data.
        let json = serde_json::to_value(regional.snapshot()).unwrap();
        assert_eq!(json["identity"]["name"], "regional-1.vx0");
        let services = json["hub"]["services"].as_array().unwrap();
        assert!(services
            .iter()
            .any(|s| s["record"]["fqdn"] == "chat.example.vx0"));
        let sessions = json["sessions"].as_array().unwrap();
        assert!(sessions.iter().any(|s| s["state"] == "Established"));

        edge.shutdown().await;
        wait_until("edge withdrawn", || {
            !has_route(regional.engine(), "10.66.1.0/24")
        })
        .await;
        regional.shutdown().await;
    }

    #[tokio::test]
    async fn test_edge_config_listing_backbone_is_rejected() {
        let text = edge_toml(9, 9).replace("id = 65100", "id = 65000");
        let edge = start_from(&text).await;

        wait_until("rejection", || {
            session_with(edge.engine(), 65_000)
                .is_some_and(|s| s.state == vx_06_peer_session::SessionState::Rejected)
        })
        .await;
        assert_eq!(edge.snapshot().counters.rejected_adjacencies, 1);
        assert_eq!(edge.engine().channels().stats().handshakes_initiated, 0);

        edge.shutdown().await;
    }
}
