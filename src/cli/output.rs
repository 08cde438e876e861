use crate::cli::args::{DisplayFormat, OutputFormat};
use crate::core::flash::{JobId, JobOutcome, TargetFamily};
use crate::core::session::{SessionId, SessionState};
use crate::domain::config::BridgeConfig;
use crate::infrastructure::serial::PortInfo;
use std::io::{self, Write};
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_ports(&self, ports: &[PortInfo]) -> Result<(), OutputError>;
    fn write_sessions(&self, sessions: &[SessionState]) -> Result<(), OutputError>;
    fn write_config(&self, config: &BridgeConfig) -> Result<(), OutputError>;
    fn write_port_data(&self, id: SessionId, data: &[u8], display: DisplayFormat) -> Result<(), OutputError>;
    fn write_flash_result(
        &self,
        target: TargetFamily,
        job: JobId,
        outcome: JobOutcome,
        detail: Option<&str>,
    ) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::BridgeError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_ports(&self, ports: &[PortInfo]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                if ports.is_empty() {
                    println!("No serial ports found");
                }
                for port in ports {
                    println!("{} ({})", port.path, port.kind);
                    if let Some(product) = &port.product {
                        println!("  Product: {}", product);
                    }
                    if let Some(manufacturer) = &port.manufacturer {
                        println!("  Manufacturer: {}", manufacturer);
                    }
                    if let (Some(vid), Some(pid)) = (port.vendor_id, port.product_id) {
                        println!("  VID:PID: {:04x}:{:04x}", vid, pid);
                    }
                    if let Some(serial) = &port.serial_number {
                        println!("  Serial: {}", serial);
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(ports)?);
            }
            OutputFormat::Table => {
                if !ports.is_empty() {
                    let rows: Vec<PortTableRow> = ports.iter().map(PortTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
        }
        Ok(())
    }

    fn write_sessions(&self, sessions: &[SessionState]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                for session in sessions {
                    println!("Session {}: {} @ {} baud", session.id, session.device_path, session.baud_rate);
                    println!("  Status: {}", session.status);
                    println!(
                        "  Data: {} bytes sent, {} bytes received, {} bytes forwarded",
                        session.statistics.bytes_sent,
                        session.statistics.bytes_received,
                        session.statistics.bytes_forwarded
                    );
                    if let Some(error) = &session.last_error {
                        println!("  Errors: {} (last: {})", session.statistics.error_count, error);
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(sessions)?);
            }
            OutputFormat::Table => {
                if !sessions.is_empty() {
                    let rows: Vec<SessionTableRow> = sessions.iter().map(SessionTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
        }
        Ok(())
    }

    fn write_config(&self, config: &BridgeConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
            _ => {
                print!("{}", toml::to_string_pretty(config)?);
            }
        }
        Ok(())
    }

    fn write_port_data(&self, id: SessionId, data: &[u8], display: DisplayFormat) -> Result<(), OutputError> {
        let mut stdout = io::stdout().lock();
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "session": id,
                    "hex": hex::encode(data),
                    "text": String::from_utf8_lossy(data),
                });
                writeln!(stdout, "{}", serde_json::to_string(&output)?)?;
            }
            _ => match display {
                DisplayFormat::Text => {
                    write!(stdout, "[{}] {}", id, String::from_utf8_lossy(data))?;
                    if !data.ends_with(b"\n") {
                        writeln!(stdout)?;
                    }
                }
                DisplayFormat::Hex => {
                    writeln!(stdout, "[{}] {}", id, format_hex(data))?;
                }
            },
        }
        stdout.flush()?;
        Ok(())
    }

    fn write_flash_result(
        &self,
        target: TargetFamily,
        job: JobId,
        outcome: JobOutcome,
        detail: Option<&str>,
    ) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "target": target,
                    "job": job,
                    "outcome": outcome,
                    "detail": detail,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => match outcome {
                JobOutcome::Succeeded => println!("{} flash job {} completed", target, job),
                JobOutcome::Cancelled => println!("{} flash job {} cancelled", target, job),
                JobOutcome::Failed => {
                    println!("{} flash job {} failed", target, job);
                    if let Some(detail) = detail {
                        println!("{}", detail);
                    }
                }
            },
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "message": message,
                    "level": "info"
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                println!("{}", message);
            }
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "error": error,
                    "level": "error"
                });
                eprintln!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}

/// Space-separated uppercase hex bytes
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Table row for a serial port
#[derive(Tabled)]
struct PortTableRow {
    path: String,
    kind: String,
    product: String,
    manufacturer: String,
    #[tabled(rename = "vid:pid")]
    ids: String,
}

impl From<&PortInfo> for PortTableRow {
    fn from(port: &PortInfo) -> Self {
        Self {
            path: port.path.clone(),
            kind: port.kind.to_string(),
            product: port.product.clone().unwrap_or_default(),
            manufacturer: port.manufacturer.clone().unwrap_or_default(),
            ids: match (port.vendor_id, port.product_id) {
                (Some(vid), Some(pid)) => format!("{:04x}:{:04x}", vid, pid),
                _ => String::new(),
            },
        }
    }
}

/// Table row for session summary
#[derive(Tabled)]
struct SessionTableRow {
    id: SessionId,
    device: String,
    baud: u32,
    status: String,
    sent: u64,
    received: u64,
    forwarded: u64,
    errors: u64,
}

impl From<&SessionState> for SessionTableRow {
    fn from(session: &SessionState) -> Self {
        Self {
            id: session.id,
            device: session.device_path.clone(),
            baud: session.baud_rate,
            status: session.status.to_string(),
            sent: session.statistics.bytes_sent,
            received: session.statistics.bytes_received,
            forwarded: session.statistics.bytes_forwarded,
            errors: session.statistics.error_count,
        }
    }
}
