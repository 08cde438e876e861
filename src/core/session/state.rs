use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Caller-assigned session identifier
pub type SessionId = u8;

/// Session state information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Session ID
    pub id: SessionId,
    /// Device path the session was last opened on
    pub device_path: String,
    pub baud_rate: u32,
    /// Current status
    pub status: SessionStatus,
    /// When the handle was last opened
    pub opened_at: Option<SystemTime>,
    /// Last activity timestamp
    pub last_activity: SystemTime,
    /// Session statistics
    pub statistics: SessionStatistics,
    /// Most recent failure recorded against the session
    pub last_error: Option<String>,
}

/// Session status enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    Closed,
    Opening,
    Open,
    Closing,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Closed => write!(f, "Closed"),
            SessionStatus::Opening => write!(f, "Opening"),
            SessionStatus::Open => write!(f, "Open"),
            SessionStatus::Closing => write!(f, "Closing"),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Write calls issued for the session
    pub chunks_sent: u64,
    /// Chunks delivered by the read loop
    pub chunks_received: u64,
    /// Bytes relayed from this session to its forwarding peer
    pub bytes_forwarded: u64,
    pub error_count: u64,
}

/// Kinds of activity that update statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    DataSent,
    DataReceived,
    DataForwarded,
    Error,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: SessionId, device_path: String, baud_rate: u32) -> Self {
        Self {
            id,
            device_path,
            baud_rate,
            status: SessionStatus::Closed,
            opened_at: None,
            last_activity: SystemTime::now(),
            statistics: SessionStatistics::default(),
            last_error: None,
        }
    }

    /// Update session status
    pub fn update_status(&mut self, status: SessionStatus) {
        if status == SessionStatus::Open {
            self.opened_at = Some(SystemTime::now());
        }
        self.status = status;
        self.last_activity = SystemTime::now();
    }

    /// Record activity
    pub fn record_activity(&mut self, activity: ActivityType, size: usize) {
        self.last_activity = SystemTime::now();

        match activity {
            ActivityType::DataSent => {
                self.statistics.chunks_sent += 1;
                self.statistics.bytes_sent += size as u64;
            }
            ActivityType::DataReceived => {
                self.statistics.chunks_received += 1;
                self.statistics.bytes_received += size as u64;
            }
            ActivityType::DataForwarded => {
                self.statistics.bytes_forwarded += size as u64;
            }
            ActivityType::Error => {
                self.statistics.error_count += 1;
            }
        }
    }

    /// Record a failure against the session
    pub fn record_error(&mut self, message: String) {
        self.record_activity(ActivityType::Error, 0);
        self.last_error = Some(message);
    }

    /// Time since the handle was opened, zero when closed
    pub fn uptime(&self) -> Duration {
        match (self.status, self.opened_at) {
            (SessionStatus::Open, Some(opened_at)) => {
                SystemTime::now().duration_since(opened_at).unwrap_or_default()
            }
            _ => Duration::ZERO,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}
