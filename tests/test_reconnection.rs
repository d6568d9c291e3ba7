//! Reconnection behavior after an unexpected broker disconnect
//!
//! Uses millisecond backoff so the full capped cycle runs quickly:
//! - a dropped session is reconnected automatically
//! - attempts stop at the cap and the status is marked exhausted
//! - an explicit connect request after exhaustion starts afresh
//! - shutdown interrupts a reconnection cycle


use botbridge::bridge::{ConnectFailure, ConnectionManager};
use botbridge::observability::metrics::BridgeMetrics;
use botbridge::testing::mocks::MockTransport;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{fast_settings, wait_until};

fn manager(transport: &MockTransport, max_attempts: u32) -> ConnectionManager {
    ConnectionManager::new(
        Arc::new(transport.clone()),
        fast_settings(max_attempts),
        Arc::new(BridgeMetrics::new()),
    )
}

#[tokio::test]
async fn test_dropped_session_reconnects_automatically() {
    let transport = MockTransport::new();
    let manager = manager(&transport, 10);
    manager.ensure_connected().await.unwrap();

    assert!(transport.close_session("keepalive timeout").await);

    assert!(wait_until(Duration::from_secs(2), || transport.connect_calls() == 2).await);
    let mut status = manager.status_reporter();
    let status = status.wait_for(|s| s.connected).await.unwrap();
    assert_eq!(status.reconnect_attempts, 0);
    assert!(status.last_error.is_none());
    assert!(!status.exhausted);

    let snapshot = manager.metrics().snapshot().connection;
    assert_eq!(snapshot.connections_lost, 1);
    assert_eq!(snapshot.connections_established, 2);
}

#[tokio::test]
async fn test_reconnection_stops_at_cap() {
    let transport = MockTransport::new();
    let manager = manager(&transport, 10);
    manager.ensure_connected().await.unwrap();

    transport.set_fail_connect(true);
    assert!(transport.close_session("broker restarted").await);

    let mut status = manager.status_reporter();
    let exhausted = tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.exhausted))
        .await
        .expect("reconnection should give up within the test window")
        .unwrap();

    assert!(!exhausted.connected);
    assert_eq!(exhausted.reconnect_attempts, 10);
    assert!(!manager.status_reporter().is_healthy());

    // One initial connect plus exactly ten reconnection attempts, then silence.
    assert_eq!(transport.connect_calls(), 11);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.connect_calls(), 11);

    let metrics = manager.metrics().snapshot().connection;
    assert_eq!(metrics.reconnect_attempts, 10);
    assert_eq!(metrics.reconnects_exhausted, 1);
}

#[tokio::test]
async fn test_explicit_connect_after_exhaustion_resets_counter() {
    let transport = MockTransport::new();
    let manager = manager(&transport, 3);
    manager.ensure_connected().await.unwrap();

    transport.set_fail_connect(true);
    transport.close_session("broker restarted").await;
    let mut status = manager.status_reporter();
    status.wait_for(|s| s.exhausted).await.unwrap();
    assert_eq!(transport.connect_calls(), 4);

    // Still down: the failure is reported but no new cycle starts.
    assert!(matches!(
        manager.ensure_connected().await,
        Err(ConnectFailure::Transport(_))
    ));
    let after_failure = manager.status_reporter().get_status();
    assert!(!after_failure.exhausted);
    assert_eq!(after_failure.reconnect_attempts, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.connect_calls(), 5);

    transport.set_fail_connect(false);
    manager.ensure_connected().await.unwrap();
    let status = manager.status_reporter().get_status();
    assert!(status.connected);
    assert!(status.is_healthy());
    assert_eq!(transport.connect_calls(), 6);
}

#[tokio::test]
async fn test_reconnect_succeeds_when_broker_returns() {
    let transport = MockTransport::new();
    let mut settings = fast_settings(10);
    settings.reconnect.sustained_delay = 25;
    let manager = ConnectionManager::new(
        Arc::new(transport.clone()),
        settings,
        Arc::new(BridgeMetrics::new()),
    );
    manager.ensure_connected().await.unwrap();

    transport.set_fail_connect(true);
    transport.close_session("broker restarted").await;
    assert!(wait_until(Duration::from_secs(2), || transport.connect_calls() >= 3).await);

    transport.set_fail_connect(false);
    let mut status = manager.status_reporter();
    let status = tokio::time::timeout(Duration::from_secs(2), status.wait_for(|s| s.connected))
        .await
        .unwrap()
        .unwrap();

    assert!(!status.exhausted);
    assert_eq!(status.reconnect_attempts, 0);
}

#[tokio::test]
async fn test_publish_during_outage_joins_reconnect() {
    let transport = MockTransport::new();
    let manager = manager(&transport, 10);
    manager.ensure_connected().await.unwrap();

    transport.close_session("network blip").await;
    assert!(
        wait_until(Duration::from_secs(1), || {
            manager.metrics().snapshot().connection.connections_lost == 1
        })
        .await
    );
    manager
        .publish("hbot/w1/stop", br#"{"skip_order_cancellation":false}"#.to_vec())
        .await
        .unwrap();

    assert_eq!(transport.published_topics(), vec!["hbot/w1/stop".to_string()]);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_shutdown_interrupts_reconnection() {
    let transport = MockTransport::new();
    let manager = ConnectionManager::new(
        Arc::new(transport.clone()),
        {
            let mut settings = fast_settings(10);
            settings.reconnect.backoff_pattern = vec![10_000];
            settings.reconnect.sustained_delay = 10_000;
            settings
        },
        Arc::new(BridgeMetrics::new()),
    );
    manager.ensure_connected().await.unwrap();

    transport.set_fail_connect(true);
    transport.close_session("broker gone").await;
    let mut status = manager.status_reporter();
    status.wait_for(|s| !s.connected).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), manager.shutdown())
        .await
        .expect("shutdown should not wait for the backoff delay");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(transport.connect_calls(), 1);
    assert_eq!(manager.ensure_connected().await, Err(ConnectFailure::Shutdown));
}
