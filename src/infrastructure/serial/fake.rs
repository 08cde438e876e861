//! In-memory serial driver.
//!
//! Devices are registered by path. Tests push inbound chunks with
//! [`FakeSerialDriver::inject`] and inspect everything written to a device
//! with [`FakeSerialDriver::written`] and [`FakeSerialDriver::write_calls`].

use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::serial::driver::{PortInfo, PortSettings, SerialDriver, SerialHandle};
use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct FakeDevice {
    info: Option<PortInfo>,
    inbound: Option<Sender<Vec<u8>>>,
    writes: Vec<Vec<u8>>,
    baud_rate: Option<u32>,
    generation: u64,
    open_count: usize,
    busy: bool,
    fail_writes: bool,
}

#[derive(Default)]
struct FakeState {
    devices: HashMap<String, FakeDevice>,
    fail_enumeration: bool,
}

/// Scriptable driver that never touches real hardware
#[derive(Clone, Default)]
pub struct FakeSerialDriver {
    state: Arc<Mutex<FakeState>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeSerialDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device with no metadata
    pub fn add_port(&self, path: &str) {
        self.add_port_info(PortInfo::bare(path));
    }

    /// Register a device with full metadata
    pub fn add_port_info(&self, info: PortInfo) {
        let mut state = lock(&self.state);
        let device = state.devices.entry(info.path.clone()).or_default();
        device.info = Some(info);
    }

    /// Unplug a device; an open handle keeps failing reads until closed
    pub fn remove_port(&self, path: &str) {
        lock(&self.state).devices.remove(path);
    }

    /// Queue a chunk for the open handle on `path`. Returns false when the
    /// device is not open.
    pub fn inject(&self, path: &str, data: &[u8]) -> bool {
        let state = lock(&self.state);
        match state.devices.get(path).and_then(|device| device.inbound.as_ref()) {
            Some(sender) => sender.send(data.to_vec()).is_ok(),
            None => false,
        }
    }

    /// All bytes written to `path`, concatenated in write order
    pub fn written(&self, path: &str) -> Vec<u8> {
        self.write_calls(path).concat()
    }

    /// Each individual write call made against `path`
    pub fn write_calls(&self, path: &str) -> Vec<Vec<u8>> {
        let state = lock(&self.state);
        state
            .devices
            .get(path)
            .map(|device| device.writes.clone())
            .unwrap_or_default()
    }

    pub fn is_open(&self, path: &str) -> bool {
        let state = lock(&self.state);
        state
            .devices
            .get(path)
            .map(|device| device.inbound.is_some())
            .unwrap_or(false)
    }

    /// Number of times `path` has been opened
    pub fn open_count(&self, path: &str) -> usize {
        let state = lock(&self.state);
        state.devices.get(path).map(|device| device.open_count).unwrap_or(0)
    }

    /// Baud rate of the most recent open of `path`
    pub fn baud_rate(&self, path: &str) -> Option<u32> {
        let state = lock(&self.state);
        state.devices.get(path).and_then(|device| device.baud_rate)
    }

    /// Make `path` refuse to open as if another program held it
    pub fn set_busy(&self, path: &str, busy: bool) {
        if let Some(device) = lock(&self.state).devices.get_mut(path) {
            device.busy = busy;
        }
    }

    /// Make every write to `path` fail
    pub fn fail_writes(&self, path: &str, fail: bool) {
        if let Some(device) = lock(&self.state).devices.get_mut(path) {
            device.fail_writes = fail;
        }
    }

    pub fn fail_enumeration(&self, fail: bool) {
        lock(&self.state).fail_enumeration = fail;
    }
}

impl SerialDriver for FakeSerialDriver {
    fn available_ports(&self) -> BridgeResult<Vec<PortInfo>> {
        let state = lock(&self.state);
        if state.fail_enumeration {
            return Err(BridgeError::Enumeration {
                message: "simulated enumeration failure".to_string(),
            });
        }

        let mut ports: Vec<PortInfo> = state
            .devices
            .iter()
            .map(|(path, device)| device.info.clone().unwrap_or_else(|| PortInfo::bare(path.clone())))
            .collect();
        ports.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(ports)
    }

    fn open(&self, settings: &PortSettings) -> BridgeResult<Box<dyn SerialHandle>> {
        let mut state = lock(&self.state);
        let device = state
            .devices
            .get_mut(&settings.path)
            .ok_or_else(|| BridgeError::Open {
                path: settings.path.clone(),
                reason: "no such device".to_string(),
            })?;

        if device.busy || device.inbound.is_some() {
            return Err(BridgeError::Open {
                path: settings.path.clone(),
                reason: "device busy".to_string(),
            });
        }

        let (sender, receiver) = mpsc::channel();
        device.inbound = Some(sender);
        device.generation += 1;
        device.open_count += 1;
        device.baud_rate = Some(settings.baud_rate);

        Ok(Box::new(FakeHandle {
            path: settings.path.clone(),
            state: Arc::clone(&self.state),
            inbound: Arc::new(Mutex::new(receiver)),
            pending: Vec::new(),
            timeout: settings.read_timeout,
            generation: device.generation,
            primary: true,
        }))
    }
}

struct FakeHandle {
    path: String,
    state: Arc<Mutex<FakeState>>,
    inbound: Arc<Mutex<Receiver<Vec<u8>>>>,
    pending: Vec<u8>,
    timeout: Duration,
    generation: u64,
    primary: bool,
}

impl SerialHandle for FakeHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let received = lock(&self.inbound).recv_timeout(self.timeout);
            match received {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
                }
            }
        }

        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        let device = state
            .devices
            .get_mut(&self.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device removed"))?;

        if device.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated write failure"));
        }

        device.writes.push(data.to_vec());
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialHandle>> {
        Ok(Box::new(FakeHandle {
            path: self.path.clone(),
            state: Arc::clone(&self.state),
            inbound: Arc::clone(&self.inbound),
            pending: Vec::new(),
            timeout: self.timeout,
            generation: self.generation,
            primary: false,
        }))
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        if !self.primary {
            return;
        }

        let mut state = lock(&self.state);
        if let Some(device) = state.devices.get_mut(&self.path) {
            if device.generation == self.generation {
                device.inbound = None;
            }
        }
    }
}
