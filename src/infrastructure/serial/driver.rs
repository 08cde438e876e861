use crate::domain::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortType};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Description of a serial device reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub path: String,
    pub kind: PortKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortKind::Usb => write!(f, "usb"),
            PortKind::Pci => write!(f, "pci"),
            PortKind::Bluetooth => write!(f, "bluetooth"),
            PortKind::Unknown => write!(f, "unknown"),
        }
    }
}

impl PortInfo {
    /// A port with no metadata beyond its path
    pub fn bare(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: PortKind::Unknown,
            manufacturer: None,
            serial_number: None,
            vendor_id: None,
            product_id: None,
            product: None,
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let mut port = PortInfo::bare(info.port_name);
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                port.kind = PortKind::Usb;
                port.vendor_id = Some(usb.vid);
                port.product_id = Some(usb.pid);
                port.serial_number = usb.serial_number;
                port.manufacturer = usb.manufacturer;
                port.product = usb.product;
            }
            SerialPortType::PciPort => port.kind = PortKind::Pci,
            SerialPortType::BluetoothPort => port.kind = PortKind::Bluetooth,
            SerialPortType::Unknown => {}
        }
        port
    }
}

/// Line settings for opening a port. Framing is always 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct PortSettings {
    pub path: String,
    pub baud_rate: u32,
    /// Reads return `TimedOut` after this long without data
    pub read_timeout: Duration,
}

/// An open serial device. Reads must honor the configured timeout so that
/// read loops can observe shutdown requests.
pub trait SerialHandle: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Perform exactly one driver write call
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()>;

    /// Second handle onto the same device, used by the read loop
    fn try_clone(&self) -> io::Result<Box<dyn SerialHandle>>;
}

/// Host serial subsystem
pub trait SerialDriver: Send + Sync {
    fn available_ports(&self) -> BridgeResult<Vec<PortInfo>>;

    fn open(&self, settings: &PortSettings) -> BridgeResult<Box<dyn SerialHandle>>;
}

/// Driver backed by the operating system through `serialport`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSerialDriver;

impl NativeSerialDriver {
    pub fn new() -> Self {
        Self
    }
}

impl SerialDriver for NativeSerialDriver {
    fn available_ports(&self) -> BridgeResult<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(|e| BridgeError::Enumeration {
            message: e.to_string(),
        })?;

        debug!("Host reported {} serial ports", ports.len());
        Ok(ports.into_iter().map(PortInfo::from).collect())
    }

    fn open(&self, settings: &PortSettings) -> BridgeResult<Box<dyn SerialHandle>> {
        let port = serialport::new(settings.path.as_str(), settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| BridgeError::Open {
                path: settings.path.clone(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(NativeHandle { port }))
    }
}

struct NativeHandle {
    port: Box<dyn SerialPort>,
}

impl SerialHandle for NativeHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialHandle>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(NativeHandle { port }))
    }
}
