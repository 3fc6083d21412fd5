//! # Channel Authentication
//!
//! No route or service data moves before both sides have proven their
//! credential, and rekeyed channels keep carrying updates.

#[cfg(test)]
mod tests {
    use crate::harness::*;
    use std::time::Duration;
    use vx_01_tier_identity::Tier;
    use vx_02_secure_channel::Credential;
    use vx_06_peer_session::SessionState;

    // =============================================================================
    // PRE-SHARED KEYS
    // =============================================================================

    #[tokio::test]
    async fn test_wrong_psk_exchanges_nothing() {
        let mut r_config = make_config(65_100, Tier::Regional, Credential::psk("right"));
        r_config.originate = vec![prefix("10.100.0.0/16")];
        r_config.services = vec![make_service("portal", "portal.region.vx0", 443)];
        let r = start(r_config).await;

        let mut e_config = make_config(66_001, Tier::Edge, Credential::psk("wrong"));
        e_config.originate = vec![prefix("10.66.1.0/24")];
        e_config.services = vec![make_service("chat", "chat.example.vx0", 6667)];
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;

        wait_until("handshake failure", || e.counters().handshake_failures >= 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(e.counters().sessions_established, 0);
        assert_eq!(r.counters().sessions_established, 0);
        assert!(r.sessions().iter().all(|s| s.state != SessionState::Established));
        assert!(!has_route(&r, "10.66.1.0/24"));
        assert!(!has_route(&e, "10.100.0.0/16"));
        assert!(r.hub().lookup("chat.example.vx0").is_none());
        assert!(r.snapshot().hub.attached.is_empty());

        e.shutdown().await;
        r.shutdown().await;
    }

    // =============================================================================
    // CERTIFICATES
    // =============================================================================

    #[tokio::test]
    async fn test_certificate_authenticated_session() {
        let authority = TestAuthority::new(7);
        let r_identity = make_identity(65_100, Tier::Regional);
        let e_identity = make_identity(66_001, Tier::Edge);

        let mut r_config = make_config(65_100, Tier::Regional, authority.credential(&r_identity, 1));
        r_config.originate = vec![prefix("10.100.0.0/16")];
        let r = start(r_config).await;

        let mut e_config = make_config(66_001, Tier::Edge, authority.credential(&e_identity, 2));
        e_config.originate = vec![prefix("10.66.1.0/24")];
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;

        wait_until("edge route at regional", || has_route(&r, "10.66.1.0/24")).await;
        wait_until("regional route at edge", || has_route(&e, "10.100.0.0/16")).await;
        assert_eq!(e.counters().handshake_failures, 0);

        e.shutdown().await;
        r.shutdown().await;
    }

    #[tokio::test]
    async fn test_certificate_from_foreign_root_rejected() {
        let trusted = TestAuthority::new(7);
        let foreign = TestAuthority::new(9);

        let r_identity = make_identity(65_100, Tier::Regional);
        let r = start(make_config(
            65_100,
            Tier::Regional,
            trusted.credential(&r_identity, 1),
        ))
        .await;

        let e_identity = make_identity(66_001, Tier::Edge);
        let mut e_config = make_config(66_001, Tier::Edge, foreign.credential(&e_identity, 2));
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;

        wait_until("handshake failure", || {
            e.counters().handshake_failures + r.channels().stats().auth_failures >= 1
        })
        .await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!has_established(&r, 66_001));
        assert!(!has_established(&e, 65_100));

        e.shutdown().await;
        r.shutdown().await;
    }

    #[tokio::test]
    async fn test_psk_and_certificate_do_not_mix() {
        let authority = TestAuthority::new(7);
        let r_identity = make_identity(65_100, Tier::Regional);
        let r = start(make_config(
            65_100,
            Tier::Regional,
            authority.credential(&r_identity, 1),
        ))
        .await;

        let mut e_config = make_psk_config(66_001, Tier::Edge);
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;

        wait_until("handshake failure", || e.counters().handshake_failures >= 1).await;
        assert_eq!(e.counters().sessions_established, 0);
        assert_eq!(r.counters().sessions_established, 0);

        e.shutdown().await;
        r.shutdown().await;
    }

    // =============================================================================
    // REKEYING
    // =============================================================================

    #[tokio::test]
    async fn test_rekeyed_session_keeps_carrying_updates() {
        let mut r_config = make_psk_config(65_100, Tier::Regional);
        r_config.session.rekey_interval = Duration::from_secs(1);
        let r = start(r_config).await;

        let mut e_config = make_psk_config(66_001, Tier::Edge);
        e_config.session.rekey_interval = Duration::from_secs(1);
        e_config.bootstrap = vec![bootstrap_to(&r, Some(65_100))];
        let e = start(e_config).await;

        wait_until("two rekeys", || {
            session_with(&e, 65_100)
                .and_then(|s| s.traffic)
                .is_some_and(|t| t.rekeys >= 2)
        })
        .await;
        assert!(has_established(&e, 65_100));

        // Both directions still work under the new keys.
        r.hub().originate(prefix("10.100.0.0/16"));
        e.hub().originate(prefix("10.66.1.0/24"));
        wait_until("regional route at edge", || has_route(&e, "10.100.0.0/16")).await;
        wait_until("edge route at regional", || has_route(&r, "10.66.1.0/24")).await;
        assert_eq!(e.counters().sessions_established, 1);

        e.shutdown().await;
        r.shutdown().await;
    }
}
