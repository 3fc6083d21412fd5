//! # Tier Hierarchy
//!
//! Adjacency rules applied to real sessions, and route propagation through
//! a Backbone - Regional - Edge chain.
//!
//! ## Topologies
//!
//! ```text
//!   bootstrap list        chain                 triangle
//!
//!   A(B)   B(R)           B ── R ── E           B1 ── B2
//!    ✗      │                                     \   /
//!           C(E)                                   R
//! ```

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use std::time::Duration;
    use vx_01_tier_identity::{NodeId, Tier};
    use vx_06_peer_session::SessionState;

    // =============================================================================
    // BOOTSTRAP LISTS
    // =============================================================================

    /// Edge node C with bootstrap list [(A, Backbone), (B, Regional)]:
    /// the session to A is rejected and the one to B establishes.
    #[tokio::test]
    async fn test_edge_bootstrap_list_skips_backbone() {
        let a = start(make_psk_config(65_000, Tier::Backbone)).await;
        let b = start(make_psk_config(65_100, Tier::Regional)).await;

        let mut config = make_psk_config(66_001, Tier::Edge);
        config.bootstrap = vec![bootstrap_to(&a, Some(65_000)), bootstrap_to(&b, Some(65_100))];
        let c = start(config).await;

        wait_until("C established with B", || has_established(&c, 65_100)).await;
        let to_a = session_with(&c, 65_000).unwrap();
        assert_eq!(to_a.state, SessionState::Rejected);
        assert!(to_a.last_error.is_some());
        assert_eq!(c.counters().rejected_adjacencies, 1);

        // A was never contacted.
        assert_eq!(a.channels().stats().handshakes_completed, 0);
        assert!(a.sessions().is_empty());
        assert!(has_established(&b, 66_001));

        c.shutdown().await;
        b.shutdown().await;
        a.shutdown().await;
    }

    #[tokio::test]
    async fn test_unannounced_backbone_rejected_after_open() {
        let mut a_config = make_psk_config(65_000, Tier::Backbone);
        a_config.originate = vec![prefix("10.200.0.0/16")];
        let a = start(a_config).await;

        let mut config = make_psk_config(66_001, Tier::Edge);
        config.originate = vec![prefix("10.66.1.0/24")];
        config.bootstrap = vec![bootstrap_to(&a, None)];
        let c = start(config).await;

        wait_until("rejection", || {
            session_with(&c, 65_000).is_some_and(|s| s.state == SessionState::Rejected)
        })
        .await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!has_route(&a, "10.66.1.0/24"));
        assert!(!has_route(&c, "10.200.0.0/16"));
        assert_eq!(c.counters().sessions_established, 0);
        assert_eq!(a.counters().sessions_established, 0);

        c.shutdown().await;
        a.shutdown().await;
    }

    #[tokio::test]
    async fn test_edge_to_edge_never_exchanges_routes() {
        let mut first_config = make_psk_config(66_001, Tier::Edge);
        first_config.originate = vec![prefix("10.66.1.0/24")];
        let first = start(first_config).await;

        let mut second_config = make_psk_config(66_002, Tier::Edge);
        second_config.originate = vec![prefix("10.66.2.0/24")];
        second_config.bootstrap = vec![bootstrap_to(&first, None)];
        let second = start(second_config).await;

        wait_until("edge-edge rejection", || {
            second
                .sessions()
                .iter()
                .any(|s| s.state == SessionState::Rejected)
        })
        .await;
        // Rejected is terminal: no reconnection follows.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let initiated = second.channels().stats().handshakes_initiated;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(second.channels().stats().handshakes_initiated, initiated);

        assert_eq!(first.hub().route_count(), 1);
        assert_eq!(second.hub().route_count(), 1);
        assert!(!has_established(&first, 66_002));

        second.shutdown().await;
        first.shutdown().await;
    }

    // =============================================================================
    // ROUTE PROPAGATION
    // =============================================================================

    #[tokio::test]
    async fn test_routes_follow_tier_export_rules() {
        let mut b_config = make_psk_config(65_000, Tier::Backbone);
        b_config.originate = vec![prefix("10.0.0.0/8"), prefix("10.200.0.0/16")];
        let b = start(b_config).await;

        let mut r_config = make_psk_config(65_100, Tier::Regional);
        r_config.originate = vec![prefix("10.100.0.0/16")];
        r_config.bootstrap = vec![bootstrap_to(&b, Some(65_000))];
        let r = start(r_config).await;

        let mut e_config = make_psk_config(66_001, Tier::Edge);
        e_config.originate = vec![prefix("10.66.1.0/24")];
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;

        wait_until("edge prefix at backbone", || has_route(&b, "10.66.1.0/24")).await;
        let at_backbone = b.hub().best_route(&prefix("10.66.1.0/24")).unwrap();
        assert_eq!(at_backbone.source, NodeId::new(65_100));
        assert_eq!(
            at_backbone.entry.path,
            vec![NodeId::new(65_100), NodeId::new(66_001)]
        );

        // The edge sees the aggregate and its regional's own prefix only.
        wait_until("aggregate at edge", || has_route(&e, "10.0.0.0/8")).await;
        wait_until("regional prefix at edge", || has_route(&e, "10.100.0.0/16")).await;
        wait_until("backbone prefix at regional", || has_route(&r, "10.200.0.0/16")).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!has_route(&e, "10.200.0.0/16"));
        assert_eq!(e.hub().route_count(), 3);
        assert_eq!(r.hub().route_count(), 4);

        e.shutdown().await;
        r.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_merged_tables_are_loop_free() {
        let mut b1_config = make_psk_config(65_000, Tier::Backbone);
        b1_config.originate = vec![prefix("10.1.0.0/16")];
        let b1 = start(b1_config).await;

        let mut b2_config = make_psk_config(65_001, Tier::Backbone);
        b2_config.originate = vec![prefix("10.2.0.0/16")];
        b2_config.bootstrap = vec![bootstrap_to(&b1, Some(65_000))];
        let b2 = start(b2_config).await;

        let mut r_config = make_psk_config(65_100, Tier::Regional);
        r_config.originate = vec![prefix("10.3.0.0/16")];
        r_config.bootstrap = vec![
            bootstrap_to(&b1, Some(65_000)),
            bootstrap_to(&b2, Some(65_001)),
        ];
        let r = start(r_config).await;

        let nodes = [(&b1, 65_000), (&b2, 65_001), (&r, 65_100)];
        for (node, _) in nodes {
            wait_until("full table", || node.hub().route_count() == 3).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        for (node, id) in nodes {
            for route in node.snapshot().hub.routes {
                assert!(
                    !route.entry.path_contains(NodeId::new(id)),
                    "{id} holds a looped path {:?}",
                    route.entry.path
                );
            }
        }

        // The direct path wins over the one through the other backbone.
        let via = r.hub().best_route(&prefix("10.1.0.0/16")).unwrap();
        assert_eq!(via.entry.path, vec![NodeId::new(65_000)]);

        r.shutdown().await;
        b2.shutdown().await;
        b1.shutdown().await;
    }
}
