//! # Service Records and Name Resolution
//!
//! Records registered on an Edge node travel up the hierarchy unmodified;
//! the name gate answers only inside `.vx0`.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use vx_01_tier_identity::{NodeId, Tier};
    use vx_04_service_registry::ServiceRecord;
    use vx_05_name_gate::Resolution;
    use vx_06_peer_session::PeerEngine;

    async fn start_chain() -> (PeerEngine, PeerEngine, PeerEngine) {
        let b = start(make_psk_config(65_000, Tier::Backbone)).await;

        let mut r_config = make_psk_config(65_100, Tier::Regional);
        r_config.services = vec![make_service("portal", "portal.region.vx0", 443)];
        r_config.bootstrap = vec![bootstrap_to(&b, Some(65_000))];
        let r = start(r_config).await;

        let mut e_config = make_psk_config(66_001, Tier::Edge);
        e_config.services = vec![make_service("chat", "chat.example.vx0", 6667)];
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;

        wait_until("regional established", || has_established(&b, 65_100)).await;
        wait_until("edge established", || has_established(&r, 66_001)).await;
        (b, r, e)
    }

    // =============================================================================
    // PROPAGATION
    // =============================================================================

    #[tokio::test]
    async fn test_edge_service_reaches_backbone_unmodified() {
        let (b, r, e) = start_chain().await;
        let registered = ServiceRecord::new(
            "chat",
            "chat.example.vx0",
            6667,
            NodeId::new(66_001),
            LOCALHOST,
            ServiceRecord::DEFAULT_TTL_SECS,
        )
        .unwrap();

        wait_until("service at backbone", || {
            b.hub().lookup("chat.example.vx0").is_some()
        })
        .await;
        assert_eq!(b.hub().lookup("chat.example.vx0"), Some(registered.clone()));
        assert_eq!(r.hub().lookup("chat.example.vx0"), Some(registered));

        match b.resolve("CHAT.example.vx0.") {
            Resolution::Service {
                fqdn,
                address,
                port,
                owner,
            } => {
                assert_eq!(fqdn, "chat.example.vx0");
                assert_eq!(address, LOCALHOST);
                assert_eq!(port, 6667);
                assert_eq!(owner, NodeId::new(66_001));
            }
            other => panic!("unexpected resolution {other:?}"),
        }

        e.shutdown().await;
        r.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_services_never_flow_downward() {
        let (b, r, e) = start_chain().await;

        wait_until("regional service at backbone", || {
            b.hub().lookup("portal.region.vx0").is_some()
        })
        .await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(e.hub().lookup("portal.region.vx0").is_none());
        assert!(matches!(
            e.resolve("portal.region.vx0"),
            Resolution::NotFound { .. }
        ));
        assert!(r.hub().lookup("portal.region.vx0").is_some());

        e.shutdown().await;
        r.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_runtime_registration_propagates() {
        let (b, r, e) = start_chain().await;
        assert!(matches!(
            b.resolve("payload.example.vx0"),
            Resolution::NotFound { .. }
        ));

        let record = ServiceRecord::new(
            "payload",
            "payload.example.vx0",
            8080,
            NodeId::new(66_001),
            LOCALHOST,
            ServiceRecord::DEFAULT_TTL_SECS,
        )
        .unwrap();
        e.hub().register_service(record).unwrap();
        wait_until("payload at backbone", || {
            matches!(b.resolve("payload.example.vx0"), Resolution::Service { port: 8080, .. })
        })
        .await;

        e.hub().unregister_service("payload.example.vx0").unwrap();
        wait_until("payload withdrawn", || {
            matches!(b.resolve("payload.example.vx0"), Resolution::NotFound { .. })
        })
        .await;
        assert!(b.hub().lookup("chat.example.vx0").is_some());

        e.shutdown().await;
        r.shutdown().await;
        b.shutdown().await;
    }

    // =============================================================================
    // CLOSED NAMESPACE
    // =============================================================================

    #[tokio::test]
    async fn test_names_outside_namespace_are_refused() {
        let (b, r, e) = start_chain().await;
        wait_until("service at backbone", || {
            b.hub().lookup("chat.example.vx0").is_some()
        })
        .await;

        for name in ["example.com", "chat.example.vx0.com", "vx0", "", "chat example.vx0"] {
            let answer = b.resolve(name);
            assert!(
                matches!(answer, Resolution::Refused { .. }),
                "{name:?} answered {answer:?}"
            );
        }
        assert_eq!(b.snapshot().names.refused, 5);

        // A record for a name outside the namespace cannot even be built.
        assert!(ServiceRecord::new(
            "web",
            "example.com",
            80,
            NodeId::new(66_001),
            LOCALHOST,
            ServiceRecord::DEFAULT_TTL_SECS,
        )
        .is_err());

        e.shutdown().await;
        r.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_reserved_names_answer_without_records() {
        let mut config = make_psk_config(65_100, Tier::Regional);
        config
            .reserved
            .insert("mirror.vx0", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)))
            .unwrap();
        let r = start(config).await;

        assert!(matches!(
            r.resolve("gateway.vx0"),
            Resolution::Reserved { address, .. } if address == IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
        ));
        assert!(matches!(
            r.resolve("mirror.vx0"),
            Resolution::Reserved { address, .. } if address == IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))
        ));
        assert!(matches!(
            r.resolve("unknown.vx0"),
            Resolution::NotFound { .. }
        ));

        let stats = r.snapshot().names;
        assert_eq!(stats.queries, 3);
        assert_eq!(stats.answered, 2);
        assert_eq!(stats.not_found, 1);

        r.shutdown().await;
    }
}
