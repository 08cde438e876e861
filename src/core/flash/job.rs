use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Runner-assigned flash job identifier
pub type JobId = u64;

/// Microcontroller family a flashing tool targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFamily {
    Stm8,
    Esp32,
}

impl TargetFamily {
    /// Firmware file extension the family's tool expects
    pub fn firmware_extension(&self) -> &'static str {
        match self {
            TargetFamily::Stm8 => "hex",
            TargetFamily::Esp32 => "bin",
        }
    }
}

impl fmt::Display for TargetFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFamily::Stm8 => write!(f, "STM8"),
            TargetFamily::Esp32 => write!(f, "ESP32"),
        }
    }
}

/// Family-specific tool arguments. `None` fields fall back to configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOptions {
    Stm8 {
        /// MCU part number passed with `-p`
        part: String,
        programmer: Option<String>,
    },
    Esp32 {
        /// Serial port the bootloader is reached on
        port: String,
        baud_rate: Option<u32>,
        chip: Option<String>,
        flash_offset: Option<String>,
    },
}

/// A request to flash one firmware image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRequest {
    pub firmware: PathBuf,
    pub options: FlashOptions,
}

impl FlashRequest {
    pub fn stm8(firmware: impl Into<PathBuf>, part: impl Into<String>) -> Self {
        Self {
            firmware: firmware.into(),
            options: FlashOptions::Stm8 {
                part: part.into(),
                programmer: None,
            },
        }
    }

    pub fn esp32(firmware: impl Into<PathBuf>, port: impl Into<String>) -> Self {
        Self {
            firmware: firmware.into(),
            options: FlashOptions::Esp32 {
                port: port.into(),
                baud_rate: None,
                chip: None,
                flash_offset: None,
            },
        }
    }

    /// Override the STM8 programmer interface; ignored for other families
    pub fn with_programmer(mut self, value: impl Into<String>) -> Self {
        if let FlashOptions::Stm8 { programmer, .. } = &mut self.options {
            *programmer = Some(value.into());
        }
        self
    }

    pub fn with_baud_rate(mut self, value: u32) -> Self {
        if let FlashOptions::Esp32 { baud_rate, .. } = &mut self.options {
            *baud_rate = Some(value);
        }
        self
    }

    pub fn with_chip(mut self, value: impl Into<String>) -> Self {
        if let FlashOptions::Esp32 { chip, .. } = &mut self.options {
            *chip = Some(value.into());
        }
        self
    }

    pub fn with_flash_offset(mut self, value: impl Into<String>) -> Self {
        if let FlashOptions::Esp32 { flash_offset, .. } = &mut self.options {
            *flash_offset = Some(value.into());
        }
        self
    }

    pub fn target(&self) -> TargetFamily {
        match self.options {
            FlashOptions::Stm8 { .. } => TargetFamily::Stm8,
            FlashOptions::Esp32 { .. } => TargetFamily::Esp32,
        }
    }

    pub fn firmware(&self) -> &Path {
        &self.firmware
    }
}

/// Lifecycle of a flash job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "Pending"),
            JobState::Running => write!(f, "Running"),
            JobState::Succeeded => write!(f, "Succeeded"),
            JobState::Failed => write!(f, "Failed"),
            JobState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// How a job that reached `Running` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl From<JobOutcome> for JobState {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded => JobState::Succeeded,
            JobOutcome::Failed => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

/// Notification published by the flash runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent {
    /// One line (or partial line) of tool output
    Output { job: JobId, text: String },
    /// Progress increased
    Progress { job: JobId, percent: u8 },
    /// Terminal notification; `detail` carries the failure summary
    Completed {
        job: JobId,
        outcome: JobOutcome,
        detail: Option<String>,
    },
}

impl FlashEvent {
    pub fn job(&self) -> JobId {
        match self {
            FlashEvent::Output { job, .. }
            | FlashEvent::Progress { job, .. }
            | FlashEvent::Completed { job, .. } => *job,
        }
    }
}
