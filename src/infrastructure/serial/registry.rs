use crate::core::session::SessionId;
use crate::domain::config::SerialConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::serial::client::{ReadEvent, SerialClient};
use crate::infrastructure::serial::driver::{PortInfo, PortSettings, SerialDriver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Open serial handles keyed by session id. The registry is the only owner
/// of each handle; callers address ports by id and never see the handle.
pub struct PortRegistry {
    driver: Arc<dyn SerialDriver>,
    ports: Mutex<HashMap<SessionId, SerialClient>>,
    settings: SerialConfig,
}

impl PortRegistry {
    pub fn new(driver: Arc<dyn SerialDriver>, settings: SerialConfig) -> Self {
        Self {
            driver,
            ports: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Snapshot of the devices the host currently reports
    pub async fn list(&self) -> BridgeResult<Vec<PortInfo>> {
        let driver = Arc::clone(&self.driver);
        tokio::task::spawn_blocking(move || driver.available_ports())
            .await
            .map_err(|e| BridgeError::Enumeration { message: e.to_string() })?
    }

    /// Open `path` under `id`, closing whatever `id` held before. Returns the
    /// receiving end of the new handle's read loop.
    pub async fn open(
        &self,
        id: SessionId,
        path: &str,
        baud_rate: u32,
    ) -> BridgeResult<mpsc::Receiver<ReadEvent>> {
        if let Err(e) = self.close(id).await {
            warn!("Ignoring close error before reopening session {}: {}", id, e);
        }

        let settings = PortSettings {
            path: path.to_string(),
            baud_rate,
            read_timeout: self.settings.read_timeout(),
        };

        let driver = Arc::clone(&self.driver);
        let handle = tokio::task::spawn_blocking(move || driver.open(&settings))
            .await
            .map_err(|e| BridgeError::Open {
                path: path.to_string(),
                reason: e.to_string(),
            })??;

        let (client, events) = SerialClient::start(
            id,
            path.to_string(),
            baud_rate,
            handle,
            self.settings.read_buffer_size,
            self.settings.channel_capacity,
        )
        .map_err(|e| BridgeError::Open {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let displaced = self.ports.lock().await.insert(id, client);
        if let Some(stale) = displaced {
            // A concurrent open for the same id won the race; keep only the newest handle.
            warn!("Session {} was reopened concurrently, releasing '{}'", id, stale.path());
            if let Err(reason) = stale.shutdown().await {
                warn!("Failed to release displaced handle for session {}: {}", id, reason);
            }
        }

        info!("Opened '{}' at {} baud as session {}", path, baud_rate, id);
        Ok(events)
    }

    /// Issue a single driver write. Returns the number of bytes written.
    pub async fn write(&self, id: SessionId, data: Vec<u8>) -> BridgeResult<usize> {
        let writer = {
            let ports = self.ports.lock().await;
            ports
                .get(&id)
                .map(|client| client.writer())
                .ok_or(BridgeError::NotOpen { id })?
        };

        if data.is_empty() {
            return Ok(0);
        }

        let len = data.len();
        let written = tokio::task::spawn_blocking(move || {
            let mut port = writer.blocking_lock();
            port.write(&data)
        })
        .await;

        match written {
            Ok(Ok(n)) if n == len => {
                debug!("Wrote {} bytes to session {}", n, id);
                Ok(n)
            }
            Ok(Ok(n)) => Err(BridgeError::Write {
                id,
                reason: format!("short write: driver accepted {} of {} bytes", n, len),
            }),
            Ok(Err(e)) => Err(BridgeError::Write { id, reason: e.to_string() }),
            Err(e) => Err(BridgeError::Write { id, reason: e.to_string() }),
        }
    }

    /// Release the handle for `id`. Closing an id that is not open succeeds.
    pub async fn close(&self, id: SessionId) -> BridgeResult<()> {
        let client = self.ports.lock().await.remove(&id);

        match client {
            Some(client) => {
                let path = client.path().to_string();
                client
                    .shutdown()
                    .await
                    .map_err(|reason| BridgeError::Close { id, reason })?;
                info!("Closed '{}' (session {})", path, id);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Close every handle, returning the first error encountered
    pub async fn close_all(&self) -> BridgeResult<()> {
        let clients: Vec<(SessionId, SerialClient)> = self.ports.lock().await.drain().collect();
        let mut first_error = None;

        for (id, client) in clients {
            if let Err(reason) = client.shutdown().await {
                warn!("Failed to close session {}: {}", id, reason);
                first_error.get_or_insert(BridgeError::Close { id, reason });
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub async fn is_open(&self, id: SessionId) -> bool {
        self.ports.lock().await.contains_key(&id)
    }

    /// Ids with an open handle, in ascending order
    pub async fn open_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.ports.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Device path and baud rate of an open session
    pub async fn describe(&self, id: SessionId) -> Option<(String, u32)> {
        let ports = self.ports.lock().await;
        ports
            .get(&id)
            .map(|client| (client.path().to_string(), client.baud_rate()))
    }
}
