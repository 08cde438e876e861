use crate::core::session::{
    forwarding::{ForwardingConfig, ForwardingLink, ForwardingMode},
    state::{ActivityType, SessionId, SessionState, SessionStatus},
};
use crate::domain::config::SerialConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::serial::{PortInfo, PortRegistry, ReadEvent, SerialDriver};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notification published by the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened {
        id: SessionId,
        path: String,
        baud_rate: u32,
    },
    /// One chunk as received from the driver
    Data { id: SessionId, bytes: Vec<u8> },
    /// A received chunk was relayed to the forwarding peer
    Forwarded {
        from: SessionId,
        to: SessionId,
        len: usize,
    },
    /// A failure recorded against the session
    Error { id: SessionId, error: String },
    Closed { id: SessionId },
}

/// Bytes wrapped around manual sends. Forwarded data is never framed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendFraming {
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
}

impl SendFraming {
    pub fn new(prefix: impl Into<Vec<u8>>, suffix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(self.prefix.len() + payload.len() + self.suffix.len());
        framed.extend_from_slice(&self.prefix);
        framed.extend_from_slice(payload);
        framed.extend_from_slice(&self.suffix);
        framed
    }
}

/// Serial session manager: port lifecycle, notifications and forwarding
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    registry: PortRegistry,
    sessions: RwLock<HashMap<SessionId, SessionState>>,
    /// Per-session notification tasks
    pumps: Mutex<HashMap<SessionId, JoinHandle<()>>>,
    /// Serializes open and close so an id never has two handles
    lifecycle: Mutex<()>,
    forwarding: RwLock<ForwardingConfig>,
    framing: RwLock<SendFraming>,
    events: mpsc::UnboundedSender<SessionEvent>,
    default_baud_rate: u32,
}

impl SessionManager {
    /// Create a session manager and the receiver for its notifications
    pub fn new(
        driver: Arc<dyn SerialDriver>,
        config: SerialConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let default_baud_rate = config.default_baud_rate;

        let inner = ManagerInner {
            registry: PortRegistry::new(driver, config),
            sessions: RwLock::new(HashMap::new()),
            pumps: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            forwarding: RwLock::new(ForwardingConfig::default()),
            framing: RwLock::new(SendFraming::default()),
            events,
            default_baud_rate,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    /// List serial devices reported by the host
    pub async fn list_ports(&self) -> BridgeResult<Vec<PortInfo>> {
        self.inner.registry.list().await
    }

    /// Open `path` as session `id`. An id that is already open is closed first.
    pub async fn open_port(&self, id: SessionId, path: &str, baud_rate: Option<u32>) -> BridgeResult<()> {
        if id == 0 {
            return Err(BridgeError::InvalidInput("session id must be positive".to_string()));
        }
        let baud_rate = baud_rate.unwrap_or(self.inner.default_baud_rate);
        if baud_rate == 0 {
            return Err(BridgeError::InvalidInput("baud rate must be positive".to_string()));
        }

        let _guard = self.inner.lifecycle.lock().await;

        if let Err(e) = self.inner.close_locked(id).await {
            warn!("Ignoring close error before reopening session {}: {}", id, e);
        }

        {
            let mut sessions = self.inner.sessions.write().await;
            let mut state = SessionState::new(id, path.to_string(), baud_rate);
            if let Some(previous) = sessions.remove(&id) {
                state.statistics = previous.statistics;
            }
            state.update_status(SessionStatus::Opening);
            sessions.insert(id, state);
        }

        match self.inner.registry.open(id, path, baud_rate).await {
            Ok(reads) => {
                self.inner.set_status(id, SessionStatus::Open).await;
                let pump = tokio::spawn(pump(Arc::downgrade(&self.inner), id, reads));
                self.inner.pumps.lock().await.insert(id, pump);

                let _ = self.inner.events.send(SessionEvent::Opened {
                    id,
                    path: path.to_string(),
                    baud_rate,
                });
                Ok(())
            }
            Err(e) => {
                let mut sessions = self.inner.sessions.write().await;
                if let Some(state) = sessions.get_mut(&id) {
                    state.update_status(SessionStatus::Closed);
                    state.record_error(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Write raw bytes to a session
    pub async fn write_port(&self, id: SessionId, data: impl Into<Vec<u8>>) -> BridgeResult<()> {
        let data = data.into();
        let len = data.len();

        match self.inner.registry.write(id, data).await {
            Ok(_) => {
                self.inner.record(id, ActivityType::DataSent, len).await;
                Ok(())
            }
            Err(e) => {
                if matches!(e, BridgeError::Write { .. }) {
                    self.inner.record_error(id, e.to_string()).await;
                }
                Err(e)
            }
        }
    }

    /// Manual operator send: the payload is wrapped in the configured framing
    pub async fn send(&self, id: SessionId, payload: impl AsRef<[u8]>) -> BridgeResult<()> {
        let framed = self.inner.framing.read().await.frame(payload.as_ref());
        self.write_port(id, framed).await
    }

    /// Close a session. Closing a session that is not open succeeds.
    pub async fn close_port(&self, id: SessionId) -> BridgeResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.close_locked(id).await
    }

    /// Close every open session, returning the first error encountered
    pub async fn close_all(&self) -> BridgeResult<()> {
        let _guard = self.inner.lifecycle.lock().await;

        let mut ids: Vec<SessionId> = self.inner.pumps.lock().await.keys().copied().collect();
        ids.extend(self.inner.registry.open_ids().await);
        ids.sort_unstable();
        ids.dedup();

        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.inner.close_locked(id).await {
                warn!("Failed to close session {}: {}", id, e);
                first_error.get_or_insert(e);
            }
        }

        info!("Closed all serial sessions");
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Switch between single and dual mode. In dual mode `link` replaces the
    /// current link; passing `None` keeps it. Applies from the next chunk.
    pub async fn set_forwarding_mode(
        &self,
        mode: ForwardingMode,
        link: Option<ForwardingLink>,
    ) -> BridgeResult<()> {
        if let Some(link) = &link {
            link.validate()?;
        }

        let mut forwarding = self.inner.forwarding.write().await;
        if mode == ForwardingMode::Dual && link.is_none() && forwarding.link.is_none() {
            return Err(BridgeError::InvalidLink(
                "dual mode requires a forwarding link".to_string(),
            ));
        }

        forwarding.mode = mode;
        if link.is_some() {
            forwarding.link = link;
        }

        info!("Forwarding mode set to {:?} (link {:?})", forwarding.mode, forwarding.link);
        Ok(())
    }

    /// Enable or disable relaying in dual mode
    pub async fn set_auto_forward(&self, enabled: bool) {
        self.inner.forwarding.write().await.auto_forward = enabled;
        debug!("Auto-forward {}", if enabled { "enabled" } else { "disabled" });
    }

    pub async fn forwarding(&self) -> ForwardingConfig {
        *self.inner.forwarding.read().await
    }

    /// Replace the prefix and suffix applied to manual sends
    pub async fn set_framing(&self, framing: SendFraming) {
        *self.inner.framing.write().await = framing;
    }

    pub async fn framing(&self) -> SendFraming {
        self.inner.framing.read().await.clone()
    }

    /// Current status of a session; unknown ids are `Closed`
    pub async fn session_state(&self, id: SessionId) -> SessionStatus {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&id)
            .map(|state| state.status)
            .unwrap_or(SessionStatus::Closed)
    }

    /// Snapshot of a session's state and statistics
    pub async fn session_summary(&self, id: SessionId) -> Option<SessionState> {
        self.inner.sessions.read().await.get(&id).cloned()
    }

    /// All sessions ever opened, ordered by id
    pub async fn list_sessions(&self) -> Vec<SessionState> {
        let sessions = self.inner.sessions.read().await;
        let mut states: Vec<SessionState> = sessions.values().cloned().collect();
        states.sort_by_key(|state| state.id);
        states
    }

    pub async fn is_open(&self, id: SessionId) -> bool {
        self.inner.registry.is_open(id).await
    }
}

impl ManagerInner {
    /// Close `id`; the caller holds the lifecycle lock
    async fn close_locked(&self, id: SessionId) -> BridgeResult<()> {
        let pump = self.pumps.lock().await.remove(&id);
        if pump.is_none() && !self.registry.is_open(id).await {
            return Ok(());
        }

        self.set_status(id, SessionStatus::Closing).await;
        let result = self.registry.close(id).await;

        // The notification task drains what the read loop already delivered.
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                warn!("Notification task for session {} ended abnormally: {}", id, e);
            }
        }

        {
            let mut sessions = self.sessions.write().await;
            if let Some(state) = sessions.get_mut(&id) {
                state.update_status(SessionStatus::Closed);
                if let Err(e) = &result {
                    state.record_error(e.to_string());
                }
            }
        }

        let _ = self.events.send(SessionEvent::Closed { id });
        result
    }

    async fn set_status(&self, id: SessionId, status: SessionStatus) {
        if let Some(state) = self.sessions.write().await.get_mut(&id) {
            state.update_status(status);
        }
    }

    async fn record(&self, id: SessionId, activity: ActivityType, size: usize) {
        if let Some(state) = self.sessions.write().await.get_mut(&id) {
            state.record_activity(activity, size);
        }
    }

    async fn record_error(&self, id: SessionId, message: String) {
        if let Some(state) = self.sessions.write().await.get_mut(&id) {
            state.record_error(message);
        }
    }

    /// Publish a received chunk and relay it to the forwarding peer
    async fn deliver(&self, id: SessionId, bytes: Vec<u8>) {
        self.record(id, ActivityType::DataReceived, bytes.len()).await;

        let target = self.forwarding.read().await.target_for(id);
        match target {
            None => {
                let _ = self.events.send(SessionEvent::Data { id, bytes });
            }
            Some(peer) => {
                let _ = self.events.send(SessionEvent::Data {
                    id,
                    bytes: bytes.clone(),
                });
                self.forward(id, peer, bytes).await;
            }
        }
    }

    async fn forward(&self, from: SessionId, to: SessionId, bytes: Vec<u8>) {
        let len = bytes.len();

        match self.registry.write(to, bytes).await {
            Ok(_) => {
                self.record(from, ActivityType::DataForwarded, len).await;
                self.record(to, ActivityType::DataSent, len).await;
                let _ = self.events.send(SessionEvent::Forwarded { from, to, len });
            }
            Err(BridgeError::NotOpen { .. }) => {
                // The link is inactive while either end is closed.
                debug!("Dropping {} bytes from session {}: session {} is not open", len, from, to);
            }
            Err(e) => {
                warn!("Forwarding {} bytes from session {} to {} failed: {}", len, from, to, e);
                let error = e.to_string();
                self.record_error(to, error.clone()).await;
                let _ = self.events.send(SessionEvent::Error { id: to, error });
            }
        }
    }
}

/// Consume one session's read loop output in arrival order
async fn pump(inner: Weak<ManagerInner>, id: SessionId, mut reads: mpsc::Receiver<ReadEvent>) {
    while let Some(event) = reads.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match event {
            ReadEvent::Chunk(bytes) => inner.deliver(id, bytes).await,
            ReadEvent::Failed(reason) => {
                let error = format!("read failed: {}", reason);
                inner.record_error(id, error.clone()).await;
                let _ = inner.events.send(SessionEvent::Error { id, error });
            }
        }
    }

    debug!("Notification task for session {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::forwarding::ForwardDirection;
    use crate::infrastructure::serial::FakeSerialDriver;
    use std::time::Duration;

    fn manager(driver: &FakeSerialDriver) -> (SessionManager, mpsc::UnboundedReceiver<SessionEvent>) {
        let config = SerialConfig {
            read_timeout_ms: 10,
            ..SerialConfig::default()
        };
        SessionManager::new(Arc::new(driver.clone()), config)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    async fn wait_for_forwards(events: &mut mpsc::UnboundedReceiver<SessionEvent>, count: usize) {
        let mut seen = 0;
        while seen < count {
            if let SessionEvent::Forwarded { .. } = next_event(events).await {
                seen += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_open_uses_default_baud_rate() {
        let driver = FakeSerialDriver::new();
        driver.add_port("COM3");
        let (manager, mut events) = manager(&driver);

        manager.open_port(1, "COM3", None).await.unwrap();
        assert_eq!(driver.baud_rate("COM3"), Some(9600));
        assert_eq!(manager.session_state(1).await, SessionStatus::Open);
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::Opened {
                id: 1,
                path: "COM3".to_string(),
                baud_rate: 9600
            }
        );

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_id_rejected() {
        let driver = FakeSerialDriver::new();
        driver.add_port("COM3");
        let (manager, _events) = manager(&driver);

        let result = manager.open_port(0, "COM3", None).await;
        assert!(matches!(result, Err(BridgeError::InvalidInput(_))));
        assert!(!driver.is_open("COM3"));
    }

    #[tokio::test]
    async fn test_failed_open_records_error() {
        let driver = FakeSerialDriver::new();
        let (manager, _events) = manager(&driver);

        let result = manager.open_port(1, "COM9", Some(9600)).await;
        assert!(matches!(result, Err(BridgeError::Open { .. })));

        let state = manager.session_summary(1).await.unwrap();
        assert_eq!(state.status, SessionStatus::Closed);
        assert_eq!(state.statistics.error_count, 1);
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_data_events_in_order() {
        let driver = FakeSerialDriver::new();
        driver.add_port("COM3");
        let (manager, mut events) = manager(&driver);
        manager.open_port(1, "COM3", None).await.unwrap();
        let _opened = next_event(&mut events).await;

        for chunk in [&b"a"[..], b"bc", b"def"] {
            assert!(driver.inject("COM3", chunk));
        }

        for expected in [&b"a"[..], b"bc", b"def"] {
            assert_eq!(
                next_event(&mut events).await,
                SessionEvent::Data {
                    id: 1,
                    bytes: expected.to_vec()
                }
            );
        }

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_applies_framing_but_forwarding_does_not() {
        let driver = FakeSerialDriver::new();
        driver.add_port("COM3");
        driver.add_port("COM4");
        let (manager, mut events) = manager(&driver);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();
        manager.set_framing(SendFraming::new(">", "\r\n")).await;
        manager
            .set_forwarding_mode(ForwardingMode::Dual, Some(ForwardingLink::between(1, 2)))
            .await
            .unwrap();

        manager.send(2, "AT").await.unwrap();
        assert_eq!(driver.written("COM4"), b">AT\r\n".to_vec());

        assert!(driver.inject("COM3", b"OK"));
        wait_for_forwards(&mut events, 1).await;
        assert_eq!(driver.written("COM4"), b">AT\r\nOK".to_vec());

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_forwarding_failure_does_not_stop_later_chunks() {
        let driver = FakeSerialDriver::new();
        driver.add_port("COM3");
        driver.add_port("COM4");
        let (manager, mut events) = manager(&driver);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();
        manager
            .set_forwarding_mode(
                ForwardingMode::Dual,
                Some(ForwardingLink::between(1, 2).with_direction(ForwardDirection::AToB)),
            )
            .await
            .unwrap();

        driver.fail_writes("COM4", true);
        assert!(driver.inject("COM3", b"lost"));
        loop {
            if let SessionEvent::Error { id, .. } = next_event(&mut events).await {
                assert_eq!(id, 2);
                break;
            }
        }

        driver.fail_writes("COM4", false);
        assert!(driver.inject("COM3", b"kept"));
        wait_for_forwards(&mut events, 1).await;
        assert_eq!(driver.written("COM4"), b"kept".to_vec());

        let state = manager.session_summary(2).await.unwrap();
        assert_eq!(state.statistics.error_count, 1);

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_peer_tears_down_link() {
        let driver = FakeSerialDriver::new();
        driver.add_port("COM3");
        driver.add_port("COM4");
        let (manager, mut events) = manager(&driver);

        manager.open_port(1, "COM3", None).await.unwrap();
        manager.open_port(2, "COM4", None).await.unwrap();
        manager
            .set_forwarding_mode(ForwardingMode::Dual, Some(ForwardingLink::between(1, 2)))
            .await
            .unwrap();
        manager.close_port(2).await.unwrap();

        assert!(driver.inject("COM3", b"orphan"));
        loop {
            match next_event(&mut events).await {
                SessionEvent::Data { id: 1, .. } => break,
                SessionEvent::Error { .. } => panic!("closed peer must not produce an error"),
                _ => {}
            }
        }
        assert!(driver.written("COM4").is_empty());

        manager.close_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_dual_mode_requires_link() {
        let driver = FakeSerialDriver::new();
        let (manager, _events) = manager(&driver);

        let result = manager.set_forwarding_mode(ForwardingMode::Dual, None).await;
        assert!(matches!(result, Err(BridgeError::InvalidLink(_))));

        let result = manager
            .set_forwarding_mode(ForwardingMode::Dual, Some(ForwardingLink::between(2, 2)))
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidLink(_))));
        assert_eq!(manager.forwarding().await.mode, ForwardingMode::Single);
    }

    #[tokio::test]
    async fn test_read_failure_is_published() {
        let driver = FakeSerialDriver::new();
        driver.add_port("COM3");
        let (manager, mut events) = manager(&driver);
        manager.open_port(1, "COM3", None).await.unwrap();

        driver.remove_port("COM3");
        loop {
            if let SessionEvent::Error { id, error } = next_event(&mut events).await {
                assert_eq!(id, 1);
                assert!(error.contains("read failed"));
                break;
            }
        }

        manager.close_port(1).await.unwrap();
        assert_eq!(manager.session_state(1).await, SessionStatus::Closed);
    }
}
