//! # Session Teardown
//!
//! Everything a session contributed leaves the network when it closes, and
//! leaves exactly once. Bootstrap sessions come back on their own when the
//! peer returns.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use std::time::Duration;
    use vx_01_tier_identity::{NodeId, NodeIdentity, Tier};
    use vx_02_secure_channel::Credential;
    use vx_05_name_gate::Resolution;
    use vx_06_peer_session::EngineConfig;

    // =============================================================================
    // EXACTLY-ONCE WITHDRAW
    // =============================================================================

    #[tokio::test]
    async fn test_closing_withdraws_exactly_once() {
        let r = start(make_psk_config(65_100, Tier::Regional)).await;

        let mut e_config = make_psk_config(66_001, Tier::Edge);
        e_config.originate = vec![prefix("10.66.1.0/24"), prefix("10.66.2.0/24")];
        e_config.services = vec![make_service("chat", "chat.example.vx0", 6667)];
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;

        wait_until("edge routes at regional", || r.hub().route_count() == 3).await;
        wait_until("edge service at regional", || {
            r.hub().lookup("chat.example.vx0").is_some()
        })
        .await;
        assert_eq!(r.counters().withdraw_events, 0);

        e.shutdown().await;
        wait_until("routes withdrawn", || r.hub().route_count() == 1).await;
        assert!(r.hub().lookup("chat.example.vx0").is_none());
        wait_until("withdraw event", || r.counters().withdraw_events == 1).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(r.counters().withdraw_events, 1);
        assert!(r.snapshot().hub.attached.is_empty());

        r.shutdown().await;
    }

    #[tokio::test]
    async fn test_withdraw_propagates_to_backbone() {
        let b = start(make_psk_config(65_000, Tier::Backbone)).await;

        let mut r_config = make_psk_config(65_100, Tier::Regional);
        r_config.bootstrap = vec![bootstrap_to(&b, Some(65_000))];
        let r = start(r_config).await;

        let mut e_config = make_psk_config(66_001, Tier::Edge);
        e_config.originate = vec![prefix("10.66.1.0/24")];
        e_config.services = vec![make_service("chat", "chat.example.vx0", 6667)];
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;

        wait_until("edge prefix at backbone", || has_route(&b, "10.66.1.0/24")).await;
        wait_until("edge service at backbone", || {
            b.hub().lookup("chat.example.vx0").is_some()
        })
        .await;

        e.shutdown().await;
        wait_until("prefix gone at backbone", || !has_route(&b, "10.66.1.0/24")).await;
        wait_until("service gone at backbone", || {
            matches!(b.resolve("chat.example.vx0"), Resolution::NotFound { .. })
        })
        .await;

        // The regional detached one session; the backbone's session stays up.
        assert_eq!(r.counters().withdraw_events, 1);
        assert_eq!(b.counters().withdraw_events, 0);
        assert!(has_established(&b, 65_100));

        r.shutdown().await;
        b.shutdown().await;
    }

    // =============================================================================
    // RECONNECTION
    // =============================================================================

    #[tokio::test]
    async fn test_bootstrap_reconnects_after_peer_restart() {
        let mut r_config = make_psk_config(65_100, Tier::Regional);
        r_config.originate = vec![prefix("10.100.0.0/16")];
        let r = start(r_config.clone()).await;
        let session_bind = r.session_addr();
        let handshake_bind = r.handshake_addr();

        let mut e_config = make_psk_config(66_001, Tier::Edge);
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;
        wait_until("first session", || has_route(&e, "10.100.0.0/16")).await;

        r.shutdown().await;
        drop(r);
        wait_until("route lost", || !has_route(&e, "10.100.0.0/16")).await;

        r_config.session_bind = session_bind;
        r_config.handshake_bind = handshake_bind;
        let r = start(r_config).await;
        wait_until("second session", || has_established(&e, 65_100)).await;
        wait_until("route back", || has_route(&e, "10.100.0.0/16")).await;
        assert_eq!(e.counters().sessions_established, 2);

        e.shutdown().await;
        r.shutdown().await;
    }

    // =============================================================================
    // IDENTITY COLLISIONS
    // =============================================================================

    #[tokio::test]
    async fn test_identity_collision_keeps_first_session() {
        let r = start(make_psk_config(65_100, Tier::Regional)).await;

        let mut genuine_config = make_psk_config(66_001, Tier::Edge);
        genuine_config.originate = vec![prefix("10.66.1.0/24")];
        genuine_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let genuine = start(genuine_config).await;
        wait_until("genuine session", || has_route(&r, "10.66.1.0/24")).await;

        let impostor_identity = NodeIdentity::new(
            NodeId::new(66_001),
            Tier::Edge,
            LOCALHOST,
            "impostor.vx0",
        )
        .unwrap();
        let mut impostor_config = EngineConfig {
            identity: impostor_identity,
            credential: Credential::psk(SHARED_SECRET),
            ..make_psk_config(66_001, Tier::Edge)
        };
        impostor_config.originate = vec![prefix("10.66.9.0/24")];
        impostor_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let impostor = start(impostor_config).await;

        wait_until("collision detected", || r.counters().identity_collisions >= 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(has_established(&r, 66_001));
        assert!(has_route(&r, "10.66.1.0/24"));
        assert!(!has_route(&r, "10.66.9.0/24"));
        assert_eq!(r.counters().withdraw_events, 0);

        impostor.shutdown().await;
        genuine.shutdown().await;
        r.shutdown().await;
    }
}
