use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use uart2uart::domain::config::SerialConfig;
use uart2uart::{
    BridgeError, FakeSerialDriver, ForwardDirection, ForwardingLink, ForwardingMode, SendFraming,
    SessionEvent, SessionManager, SessionStatus,
};

/// Session manager integration tests against the in-memory driver
#[cfg(test)]
mod integration_tests {
    use super::*;

    fn setup(ports: &[&str]) -> (FakeSerialDriver, SessionManager, UnboundedReceiver<SessionEvent>) {
        let driver = FakeSerialDriver::new();
        for port in ports {
            driver.add_port(port);
        }
        let config = SerialConfig {
            read_timeout_ms: 10,
            ..SerialConfig::default()
        };
        let (manager, events) = SessionManager::new(Arc::new(driver.clone()), config);
        (driver, manager, events)
    }

    async fn next_event(events: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    /// Collect `count` data events for session `id`, skipping everything else
    async fn collect_data(
        events: &mut UnboundedReceiver<SessionEvent>,
        id: u8,
        count: usize,
    ) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while chunks.len() < count {
            if let SessionEvent::Data { id: source, bytes } = next_event(events).await {
                if source == id {
                    chunks.push(bytes);
                }
            }
        }
        chunks
    }

    async fn wait_for_forwards(events: &mut UnboundedReceiver<SessionEvent>, count: usize) {
        let mut seen = 0;
        while seen < count {
            if let SessionEvent::Forwarded { .. } = next_event(events).await {
                seen += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_open_write_close_relist() {
        let (driver, manager, _events) = setup(&["COM3"]);

        let ports = manager.list_ports().await.unwrap();
        assert!(ports.iter().any(|port| port.path == "COM3"));

        manager.open_port(1, "COM3", Some(115200)).await.unwrap();
        assert_eq!(driver.baud_rate("COM3"), Some(115200));
        assert_eq!(manager.session_state(1).await, SessionStatus::Open);

        manager.write_port(1, b"hello".to_vec()).await.unwrap();
        assert_eq!(driver.written("COM3"), b"hello".to_vec());

        manager.close_port(1).await.unwrap();
        assert!(!driver.is_open("COM3"));
        assert_eq!(manager.session_state(1).await, SessionStatus::Closed);

        // The device is still listed and can be reopened
        let ports = manager.list_ports().await.unwrap();
        assert!(ports.iter().any(|port| port.path == "COM3"));
        manager.open_port(1, "COM3", None).await.unwrap();
        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_dual_mode_forwards_verbatim() {
        let (driver, manager, mut events) = setup(&["COM3", "COM4"]);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();
        manager
            .set_forwarding_mode(ForwardingMode::Dual, Some(ForwardingLink::between(1, 2)))
            .await
            .unwrap();

        assert!(driver.inject("COM3", &[0x41, 0x42]));
        wait_for_forwards(&mut events, 1).await;

        assert_eq!(driver.write_calls("COM4"), vec![vec![0x41, 0x42]]);
        let summary = manager.session_summary(1).await.unwrap();
        assert_eq!(summary.statistics.bytes_forwarded, 2);

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_forwarding_preserves_order() {
        let (driver, manager, mut events) = setup(&["COM3", "COM4"]);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();
        manager
            .set_forwarding_mode(
                ForwardingMode::Dual,
                Some(ForwardingLink::between(1, 2).with_direction(ForwardDirection::AToB)),
            )
            .await
            .unwrap();

        let chunks: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i; (i as usize % 5) + 1]).collect();
        for chunk in &chunks {
            assert!(driver.inject("COM3", chunk));
        }
        wait_for_forwards(&mut events, chunks.len()).await;

        assert_eq!(driver.write_calls("COM4"), chunks);
        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_bidirectional_link() {
        let (driver, manager, mut events) = setup(&["COM3", "COM4"]);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();
        manager
            .set_forwarding_mode(ForwardingMode::Dual, Some(ForwardingLink::between(1, 2)))
            .await
            .unwrap();

        assert!(driver.inject("COM3", b"ping"));
        wait_for_forwards(&mut events, 1).await;
        assert!(driver.inject("COM4", b"pong"));
        wait_for_forwards(&mut events, 1).await;

        assert_eq!(driver.written("COM4"), b"ping".to_vec());
        assert_eq!(driver.written("COM3"), b"pong".to_vec());
        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_mode_does_not_forward() {
        let (driver, manager, mut events) = setup(&["COM3", "COM4"]);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();

        assert!(driver.inject("COM3", b"local"));
        let chunks = collect_data(&mut events, 1, 1).await;
        assert_eq!(chunks, vec![b"local".to_vec()]);
        assert!(driver.written("COM4").is_empty());

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_forward_toggle_applies_to_next_chunk() {
        let (driver, manager, mut events) = setup(&["COM3", "COM4"]);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();
        manager
            .set_forwarding_mode(ForwardingMode::Dual, Some(ForwardingLink::between(1, 2)))
            .await
            .unwrap();
        manager.set_auto_forward(false).await;

        assert!(driver.inject("COM3", b"held"));
        collect_data(&mut events, 1, 1).await;
        assert!(driver.written("COM4").is_empty());

        manager.set_auto_forward(true).await;
        assert!(driver.inject("COM3", b"sent"));
        wait_for_forwards(&mut events, 1).await;
        assert_eq!(driver.written("COM4"), b"sent".to_vec());

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_open_leaves_one_handle() {
        let (driver, manager, mut events) = setup(&["COM3"]);

        manager.open_port(1, "COM3", Some(9600)).await.unwrap();
        manager.open_port(1, "COM3", Some(19200)).await.unwrap();

        assert_eq!(driver.open_count("COM3"), 2);
        assert!(driver.is_open("COM3"));
        assert_eq!(driver.baud_rate("COM3"), Some(19200));

        // Data still arrives exactly once through the new handle
        assert!(driver.inject("COM3", b"x"));
        assert_eq!(collect_data(&mut events, 1, 1).await, vec![b"x".to_vec()]);

        manager.close_all().await.unwrap();
        assert!(!driver.is_open("COM3"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_driver, manager, _events) = setup(&["COM3"]);

        manager.close_port(1).await.unwrap();
        manager.open_port(1, "COM3", None).await.unwrap();
        manager.close_port(1).await.unwrap();
        manager.close_port(1).await.unwrap();
        assert_eq!(manager.session_state(1).await, SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_interrupts_pending_read() {
        let (driver, manager, _events) = setup(&["COM3"]);
        manager.open_port(1, "COM3", None).await.unwrap();

        // Nothing is injected, so the read loop is parked in a driver read
        tokio::time::sleep(Duration::from_millis(30)).await;
        timeout(Duration::from_millis(500), manager.close_port(1))
            .await
            .expect("close did not finish within a few read timeouts")
            .unwrap();

        assert!(!driver.is_open("COM3"));
        assert_eq!(manager.session_state(1).await, SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_write_to_unopened_session() {
        let (_driver, manager, _events) = setup(&[]);

        let result = manager.write_port(3, b"data".to_vec()).await;
        assert!(matches!(result, Err(BridgeError::NotOpen { id: 3 })));
    }

    #[tokio::test]
    async fn test_busy_port_reports_open_error() {
        let (driver, manager, _events) = setup(&["COM3"]);
        driver.set_busy("COM3", true);

        match manager.open_port(1, "COM3", None).await {
            Err(BridgeError::Open { path, .. }) => assert_eq!(path, "COM3"),
            other => panic!("expected open error, got {:?}", other),
        }
        assert_eq!(manager.session_state(1).await, SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_framing_applies_only_to_manual_sends() {
        let (driver, manager, mut events) = setup(&["COM3", "COM4"]);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();
        manager.set_framing(SendFraming::new("<", ">")).await;
        manager
            .set_forwarding_mode(ForwardingMode::Dual, Some(ForwardingLink::between(1, 2)))
            .await
            .unwrap();

        manager.send(1, "cmd").await.unwrap();
        assert_eq!(driver.written("COM3"), b"<cmd>".to_vec());

        // Raw writes bypass framing
        manager.write_port(1, b"raw".to_vec()).await.unwrap();
        assert_eq!(driver.written("COM3"), b"<cmd>raw".to_vec());

        assert!(driver.inject("COM4", b"reply"));
        wait_for_forwards(&mut events, 1).await;
        assert_eq!(driver.written("COM3"), b"<cmd>rawreply".to_vec());

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_forward_failure_recorded_and_forwarding_continues() {
        let (driver, manager, mut events) = setup(&["COM3", "COM4"]);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();
        manager
            .set_forwarding_mode(ForwardingMode::Dual, Some(ForwardingLink::between(1, 2)))
            .await
            .unwrap();

        driver.fail_writes("COM4", true);
        assert!(driver.inject("COM3", b"first"));
        loop {
            if let SessionEvent::Error { id, .. } = next_event(&mut events).await {
                assert_eq!(id, 2);
                break;
            }
        }

        driver.fail_writes("COM4", false);
        assert!(driver.inject("COM3", b"second"));
        wait_for_forwards(&mut events, 1).await;
        assert_eq!(driver.written("COM4"), b"second".to_vec());

        let summary = manager.session_summary(2).await.unwrap();
        assert_eq!(summary.statistics.error_count, 1);
        assert!(summary.last_error.is_some());

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_report_lifecycle() {
        let (_driver, manager, mut events) = setup(&["COM3"]);

        manager.open_port(1, "COM3", Some(57600)).await.unwrap();
        manager.close_port(1).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::Opened {
                id: 1,
                path: "COM3".to_string(),
                baud_rate: 57600
            }
        );
        assert_eq!(next_event(&mut events).await, SessionEvent::Closed { id: 1 });
    }

    #[tokio::test]
    async fn test_list_sessions_ordered() {
        let (_driver, manager, _events) = setup(&["COM3", "COM4"]);

        manager.open_port(2, "COM4", None).await.unwrap();
        manager.open_port(1, "COM3", None).await.unwrap();

        let sessions = manager.list_sessions().await;
        let ids: Vec<u8> = sessions.iter().map(|state| state.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(sessions.iter().all(|state| state.is_open()));

        manager.close_all().await.unwrap();
        assert!(manager
            .list_sessions()
            .await
            .iter()
            .all(|state| state.status == SessionStatus::Closed));
    }
}
