use crate::core::flash::{JobId, TargetFamily};
use crate::core::session::SessionId;
use std::path::PathBuf;
use thiserror::Error;

/// uart2uart unified error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to enumerate serial ports: {message}")]
    Enumeration { message: String },

    #[error("Failed to open '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error("Write to session {id} failed: {reason}")]
    Write { id: SessionId, reason: String },

    #[error("Close of session {id} failed: {reason}")]
    Close { id: SessionId, reason: String },

    #[error("Session {id} is not open")]
    NotOpen { id: SessionId },

    #[error("A {target} flash job is already running (job {job})")]
    AlreadyRunning { target: TargetFamily, job: JobId },

    #[error("{target} flashing tool not found at {}", .path.display())]
    ToolNotFound { target: TargetFamily, path: PathBuf },

    #[error("Failed to spawn {target} flashing tool: {reason}")]
    Spawn { target: TargetFamily, reason: String },

    #[error("{target} flashing tool exited with {}: {output}", exit_code_label(.code))]
    SubprocessExit {
        target: TargetFamily,
        code: Option<i32>,
        output: String,
    },

    #[error("Flash job {job} is not running")]
    NotRunning { job: JobId },

    #[error("Flash job {job} failed: {detail}")]
    JobFailed { job: JobId, detail: String },

    #[error("Firmware image {} is unusable: {reason}", .path.display())]
    InvalidFirmware { path: PathBuf, reason: String },

    #[error("Invalid forwarding link: {0}")]
    InvalidLink(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
