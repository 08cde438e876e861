use crate::core::session::SessionId;
use crate::infrastructure::serial::driver::SerialHandle;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Output of a session's read loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// Bytes exactly as one driver read returned them
    Chunk(Vec<u8>),
    /// The read loop hit a driver error and stopped
    Failed(String),
}

/// One open serial handle plus the blocking task that reads from it
pub struct SerialClient {
    id: SessionId,
    path: String,
    baud_rate: u32,
    writer: Arc<Mutex<Box<dyn SerialHandle>>>,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialClient {
    /// Take ownership of `handle` and start the read loop. Received chunks
    /// are published on the returned channel until the client shuts down.
    pub fn start(
        id: SessionId,
        path: String,
        baud_rate: u32,
        handle: Box<dyn SerialHandle>,
        read_buffer_size: usize,
        channel_capacity: usize,
    ) -> io::Result<(Self, mpsc::Receiver<ReadEvent>)> {
        let reader_handle = handle.try_clone()?;
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));

        let reader_shutdown = Arc::clone(&shutdown);
        let buffer_size = read_buffer_size.max(1);
        let reader = tokio::task::spawn_blocking(move || {
            read_loop(id, reader_handle, tx, reader_shutdown, buffer_size);
        });

        Ok((
            Self {
                id,
                path,
                baud_rate,
                writer: Arc::new(Mutex::new(handle)),
                shutdown,
                reader: Some(reader),
            },
            rx,
        ))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Shared write half; only the registry hands this out
    pub(crate) fn writer(&self) -> Arc<Mutex<Box<dyn SerialHandle>>> {
        Arc::clone(&self.writer)
    }

    /// Stop the read loop, flush pending output and release the handle.
    /// The read loop exits within one driver read timeout.
    pub async fn shutdown(mut self) -> Result<(), String> {
        self.shutdown.store(true, Ordering::Release);

        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!("Read loop for session {} ended abnormally: {}", self.id, e);
            }
        }

        let writer = Arc::clone(&self.writer);
        let flushed = tokio::task::spawn_blocking(move || {
            let mut port = writer.blocking_lock();
            port.flush()
        })
        .await;

        match flushed {
            Ok(Ok(())) => {
                debug!("Session {} released '{}'", self.id, self.path);
                Ok(())
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl Drop for SerialClient {
    fn drop(&mut self) {
        // Stop the read loop if the client is dropped without shutdown
        self.shutdown.store(true, Ordering::Release);
    }
}

fn read_loop(
    id: SessionId,
    mut port: Box<dyn SerialHandle>,
    tx: mpsc::Sender<ReadEvent>,
    shutdown: Arc<AtomicBool>,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];

    while !shutdown.load(Ordering::Acquire) {
        match port.read(&mut buffer) {
            Ok(0) => {
                if tx.is_closed() {
                    break;
                }
            }
            Ok(n) => {
                debug!("Session {} received {} bytes", id, n);
                if tx.blocking_send(ReadEvent::Chunk(buffer[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                if tx.is_closed() {
                    break;
                }
            }
            Err(e) => {
                if !shutdown.load(Ordering::Acquire) {
                    error!("Failed to read from session {}: {}", id, e);
                    let _ = tx.blocking_send(ReadEvent::Failed(e.to_string()));
                }
                break;
            }
        }
    }

    debug!("Read loop for session {} stopped", id);
}
